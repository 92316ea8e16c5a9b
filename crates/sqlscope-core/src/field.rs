//! Field declarations and the descriptors derived from them.
//!
//! A record type lists its fields once as [`FieldDef`]s. The registry turns
//! them into [`FieldDescriptor`]s: column names resolved, tag settings parsed,
//! and flags classified.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::model::ModelType;
use crate::tag::TagSettings;
use crate::types::SqlType;

// ============================================================================
// Declarations
// ============================================================================

/// What a declared field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A scalar column.
    Column(SqlType),
    /// A single related record (has-one or belongs-to).
    One(ModelType),
    /// A collection of related records (has-many or many-to-many).
    Many(ModelType),
    /// A record whose fields are flattened into the owner's table.
    Embedded(ModelType),
}

/// A field as declared by a record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Logical name used by `get_value`/`set_value`.
    pub name: &'static str,
    pub kind: FieldKind,
    /// Raw settings, see [`TagSettings`].
    pub tag: &'static str,
    /// Field is stored through a custom value conversion.
    pub scanner: bool,
}

impl FieldDef {
    /// A scalar column.
    #[must_use]
    pub const fn column(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            kind: FieldKind::Column(sql_type),
            tag: "",
            scanner: false,
        }
    }

    /// A single related record.
    #[must_use]
    pub fn one<M: crate::Model>(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::One(ModelType::of::<M>()),
            tag: "",
            scanner: false,
        }
    }

    /// A collection of related records.
    #[must_use]
    pub fn many<M: crate::Model>(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Many(ModelType::of::<M>()),
            tag: "",
            scanner: false,
        }
    }

    /// An embedded record flattened into this table.
    #[must_use]
    pub fn embedded<M: crate::Model>(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Embedded(ModelType::of::<M>()),
            tag: "",
            scanner: false,
        }
    }

    /// Attach tag settings.
    #[must_use]
    pub const fn tag(mut self, tag: &'static str) -> Self {
        self.tag = tag;
        self
    }

    /// Mark as converted through a custom value type.
    #[must_use]
    pub const fn scanner(mut self) -> Self {
        self.scanner = true;
        self
    }
}

// ============================================================================
// Flags
// ============================================================================

/// Classification bits of a field.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FieldFlags(u16);

impl FieldFlags {
    pub const PRIMARY_KEY: Self = Self(1);
    pub const NORMAL: Self = Self(1 << 1);
    pub const IGNORED: Self = Self(1 << 2);
    pub const SCANNER: Self = Self(1 << 3);
    pub const TIME: Self = Self(1 << 4);
    pub const HAS_DEFAULT: Self = Self(1 << 5);
    pub const SLICE: Self = Self(1 << 6);
    pub const STRUCT: Self = Self(1 << 7);
    pub const EMBEDDED: Self = Self(1 << 8);
    pub const AUTO_INCREMENT: Self = Self(1 << 9);

    const NAMES: [(Self, &'static str); 10] = [
        (Self::PRIMARY_KEY, "PRIMARY_KEY"),
        (Self::NORMAL, "NORMAL"),
        (Self::IGNORED, "IGNORED"),
        (Self::SCANNER, "SCANNER"),
        (Self::TIME, "TIME"),
        (Self::HAS_DEFAULT, "HAS_DEFAULT"),
        (Self::SLICE, "SLICE"),
        (Self::STRUCT, "STRUCT"),
        (Self::EMBEDDED, "EMBEDDED"),
        (Self::AUTO_INCREMENT, "AUTO_INCREMENT"),
    ];

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for FieldFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FieldFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for FieldFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "FieldFlags({})", names.join(" | "))
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Shared, immutable description of one field of a record type.
///
/// The foreign-key marker is the only state that changes after construction:
/// relationship wiring sets it once, on whichever side holds the key.
pub struct FieldDescriptor {
    /// Logical name. Embedded fields are addressed as `"outer.inner"`.
    pub name: String,
    /// Column name in the table.
    pub db_name: String,
    pub sql_type: SqlType,
    pub flags: FieldFlags,
    pub settings: TagSettings,
    /// Related record type for `One`/`Many` fields.
    pub target: Option<ModelType>,
    /// Position in the owning descriptor.
    pub index: usize,
    foreign_key: AtomicBool,
}

impl FieldDescriptor {
    pub(crate) fn new(
        name: String,
        db_name: String,
        sql_type: SqlType,
        flags: FieldFlags,
        settings: TagSettings,
        target: Option<ModelType>,
        index: usize,
    ) -> Self {
        Self {
            name,
            db_name,
            sql_type,
            flags,
            settings,
            target,
            index,
            foreign_key: AtomicBool::new(false),
        }
    }

    pub fn is_primary_key(&self) -> bool {
        self.flags.contains(FieldFlags::PRIMARY_KEY)
    }

    /// A persisted scalar column.
    pub fn is_normal(&self) -> bool {
        self.flags.contains(FieldFlags::NORMAL)
    }

    pub fn is_ignored(&self) -> bool {
        self.flags.contains(FieldFlags::IGNORED)
    }

    pub fn is_time(&self) -> bool {
        self.flags.contains(FieldFlags::TIME)
    }

    pub fn has_default(&self) -> bool {
        self.flags.contains(FieldFlags::HAS_DEFAULT)
    }

    pub fn is_auto_increment(&self) -> bool {
        self.flags.contains(FieldFlags::AUTO_INCREMENT)
    }

    /// Holds a related record or collection rather than a column.
    pub fn is_relation(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_foreign_key(&self) -> bool {
        self.foreign_key.load(Ordering::Acquire)
    }

    pub(crate) fn mark_foreign_key(&self) {
        self.foreign_key.store(true, Ordering::Release);
    }

    /// Whether `name` addresses this field by logical or column name.
    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.db_name == name
    }

    /// Copy of this field as a join-table key column named `db_name`:
    /// never a primary key on its own, never auto-incrementing.
    pub fn as_join_table_key(&self, db_name: &str) -> FieldDescriptor {
        let mut flags = self.flags;
        flags.remove(FieldFlags::PRIMARY_KEY);
        flags.remove(FieldFlags::AUTO_INCREMENT);
        flags.remove(FieldFlags::HAS_DEFAULT);
        let mut settings = self.settings.clone();
        settings.remove("AUTO_INCREMENT");
        settings.remove("DEFAULT");
        FieldDescriptor::new(
            self.name.clone(),
            db_name.to_string(),
            self.sql_type,
            flags,
            settings,
            None,
            self.index,
        )
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("db_name", &self.db_name)
            .field("sql_type", &self.sql_type)
            .field("flags", &self.flags)
            .field("foreign_key", &self.is_foreign_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_contains_and_insert() {
        let mut flags = FieldFlags::NORMAL | FieldFlags::PRIMARY_KEY;
        assert!(flags.contains(FieldFlags::PRIMARY_KEY));
        assert!(!flags.contains(FieldFlags::TIME));
        flags.insert(FieldFlags::TIME);
        flags.remove(FieldFlags::NORMAL);
        assert!(flags.contains(FieldFlags::TIME));
        assert!(!flags.contains(FieldFlags::NORMAL));
    }

    #[test]
    fn test_flags_debug_lists_names() {
        let flags = FieldFlags::NORMAL | FieldFlags::HAS_DEFAULT;
        assert_eq!(format!("{flags:?}"), "FieldFlags(NORMAL | HAS_DEFAULT)");
    }

    #[test]
    fn test_column_def_builder() {
        let def = FieldDef::column("name", SqlType::Text)
            .tag("size:255")
            .scanner();
        assert_eq!(def.name, "name");
        assert_eq!(def.kind, FieldKind::Column(SqlType::Text));
        assert_eq!(def.tag, "size:255");
        assert!(def.scanner);
    }

    #[test]
    fn test_descriptor_foreign_key_marker() {
        let field = FieldDescriptor::new(
            "user_id".into(),
            "user_id".into(),
            SqlType::BigInt,
            FieldFlags::NORMAL,
            TagSettings::default(),
            None,
            0,
        );
        assert!(!field.is_foreign_key());
        field.mark_foreign_key();
        assert!(field.is_foreign_key());
        assert!(field.matches("user_id"));
    }
}
