//! The metadata cache.
//!
//! [`ModelRegistry`] derives a [`ModelDescriptor`] for each record type on
//! first use and keeps it for the registry's lifetime. Nothing is ever
//! evicted.
//!
//! Describing happens in two phases:
//!
//! 1. Fields are enumerated, tag settings parsed, columns named and primary
//!    keys detected. The result is inserted into the cache immediately.
//! 2. Relationship fields are wired. Wiring looks related types up through
//!    the same cache but only ever needs their phase-1 fields, so a cycle
//!    (`User` ↔ `Company`, or `User.manager: User`) resolves to the cached
//!    instance instead of recursing.
//!
//! The cache is guarded by an `RwLock`: hits only take the read lock, and the
//! write lock is held just long enough to insert a freshly built descriptor.
//!
//! # Example
//!
//! ```ignore
//! let registry = ModelRegistry::new();
//! let users = registry.describe::<User>();
//! assert_eq!(users.table_name(), "users");
//! assert!(Arc::ptr_eq(&users, &registry.describe::<User>()));
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::field::{FieldDef, FieldDescriptor, FieldFlags, FieldKind};
use crate::model::{Model, ModelType};
use crate::naming::{table_name_for, to_db_name};
use crate::relationship::{
    DefaultJoinTableHandler, JoinTableForeignKey, Polymorphic, Relationship, RelationshipKind,
};
use crate::tag::TagSettings;
use crate::types::SqlType;

/// Embedded records nest at most this deep.
const MAX_EMBED_DEPTH: usize = 8;

/// Column holding the soft-delete timestamp.
pub const SOFT_DELETE_COLUMN: &str = "deleted_at";

// ============================================================================
// Descriptor
// ============================================================================

/// Structural description of one record type.
pub struct ModelDescriptor {
    model_type: ModelType,
    table_name: String,
    fields: Vec<FieldDescriptor>,
    primary_keys: Vec<usize>,
    relationships: OnceLock<Vec<Option<Relationship>>>,
}

impl ModelDescriptor {
    fn build(model_type: ModelType, singular_table: bool) -> Self {
        let table_name = model_type
            .table_name()
            .unwrap_or_else(|| table_name_for(model_type.name(), singular_table));

        let mut fields = Vec::new();
        collect_fields(&mut fields, &model_type.fields(), "", "", false, 0);

        let mut seen_columns: HashMap<String, usize> = HashMap::new();
        for field in &mut fields {
            if !field.is_normal() {
                continue;
            }
            if let Some(first) = seen_columns.get(&field.db_name) {
                tracing::warn!(
                    model = model_type.name(),
                    column = %field.db_name,
                    first_field = *first,
                    duplicate_field = %field.name,
                    "duplicate column name, ignoring later field"
                );
                field.flags.remove(FieldFlags::NORMAL);
                field.flags.insert(FieldFlags::IGNORED);
            } else {
                seen_columns.insert(field.db_name.clone(), field.index);
            }
        }

        let mut primary_keys: Vec<usize> = fields
            .iter()
            .filter(|f| f.is_primary_key() && f.is_normal())
            .map(|f| f.index)
            .collect();
        if primary_keys.is_empty() {
            if let Some(id) = fields
                .iter_mut()
                .find(|f| f.is_normal() && (f.name == "id" || f.db_name == "id"))
            {
                id.flags.insert(FieldFlags::PRIMARY_KEY);
                if id.sql_type.is_integer() && id.settings.flag("AUTO_INCREMENT") != Some(false) {
                    id.flags.insert(FieldFlags::AUTO_INCREMENT);
                }
                primary_keys.push(id.index);
            }
        }

        Self {
            model_type,
            table_name,
            fields,
            primary_keys,
            relationships: OnceLock::new(),
        }
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    pub fn type_name(&self) -> &'static str {
        self.model_type.name()
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Every field in declaration order, embedded fields flattened in place.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Persisted scalar columns.
    pub fn normal_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_normal())
    }

    /// Look a field up by logical name, column name, or the column form of `name`.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.matches(name))
            .or_else(|| {
                let db_name = to_db_name(name);
                self.fields.iter().find(|f| f.db_name == db_name)
            })
    }

    /// Persisted field stored in `column`.
    pub fn field_by_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.normal_fields().find(|f| f.db_name == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.field_by_column(column).is_some()
    }

    pub fn primary_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.primary_keys.iter().map(|i| &self.fields[*i])
    }

    pub fn primary_key_count(&self) -> usize {
        self.primary_keys.len()
    }

    /// The primary field. With several primary keys, the one stored in `id`
    /// wins, otherwise the first declared.
    pub fn primary_field(&self) -> Option<&FieldDescriptor> {
        if self.primary_keys.len() > 1 {
            if let Some(id) = self.primary_fields().find(|f| f.db_name == "id") {
                return Some(id);
            }
        }
        self.primary_fields().next()
    }

    /// The `deleted_at` field when the type supports soft deletion.
    pub fn soft_delete_field(&self) -> Option<&FieldDescriptor> {
        self.field_by_column(SOFT_DELETE_COLUMN)
    }

    /// Relationship wired on a relation field. `None` before wiring, for
    /// scalar fields, and for relation fields whose keys could not be found.
    pub fn relationship(&self, field: &str) -> Option<&Relationship> {
        let index = self.fields.iter().find(|f| f.is_relation() && f.matches(field))?.index;
        self.relationships.get()?.get(index)?.as_ref()
    }

    /// Every wired relationship with its field.
    pub fn relationships(&self) -> impl Iterator<Item = (&FieldDescriptor, &Relationship)> {
        self.relationships
            .get()
            .into_iter()
            .flat_map(|rels| rels.iter().enumerate())
            .filter_map(|(i, rel)| rel.as_ref().map(|r| (&self.fields[i], r)))
    }

    pub fn is_wired(&self) -> bool {
        self.relationships.get().is_some()
    }

    /// Find a scalar field the way key inference does.
    fn key_field(&self, name: &str) -> Option<&FieldDescriptor> {
        let db_name = to_db_name(name);
        self.fields
            .iter()
            .filter(|f| !f.is_relation() && !f.is_ignored())
            .find(|f| f.name == name || f.db_name == name || f.db_name == db_name)
    }
}

impl fmt::Debug for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("model", &self.model_type.name())
            .field("table_name", &self.table_name)
            .field("fields", &self.fields)
            .field("primary_keys", &self.primary_keys)
            .field("wired", &self.is_wired())
            .finish()
    }
}

fn collect_fields(
    out: &mut Vec<FieldDescriptor>,
    defs: &[FieldDef],
    name_prefix: &str,
    column_prefix: &str,
    embedded: bool,
    depth: usize,
) {
    for def in defs {
        let settings = TagSettings::parse(def.tag);
        let name = format!("{name_prefix}{}", def.name);
        let mut flags = FieldFlags::empty();
        if embedded {
            flags.insert(FieldFlags::EMBEDDED);
        }
        let ignored = settings.has("-");

        let (sql_type, target) = match def.kind {
            FieldKind::Column(sql_type) => {
                if ignored {
                    flags.insert(FieldFlags::IGNORED);
                } else {
                    flags.insert(FieldFlags::NORMAL);
                }
                if settings.has("PRIMARY_KEY") {
                    flags.insert(FieldFlags::PRIMARY_KEY);
                    if sql_type.is_integer() && settings.flag("AUTO_INCREMENT") != Some(false) {
                        flags.insert(FieldFlags::AUTO_INCREMENT);
                    }
                }
                if settings.flag("AUTO_INCREMENT") == Some(true) {
                    flags.insert(FieldFlags::AUTO_INCREMENT);
                    if !flags.contains(FieldFlags::PRIMARY_KEY) {
                        flags.insert(FieldFlags::HAS_DEFAULT);
                    }
                }
                if settings.has("DEFAULT") {
                    flags.insert(FieldFlags::HAS_DEFAULT);
                }
                if def.scanner {
                    flags.insert(FieldFlags::SCANNER);
                }
                if sql_type.is_time() {
                    flags.insert(FieldFlags::TIME);
                }
                (sql_type, None)
            }
            FieldKind::One(target) => {
                flags.insert(FieldFlags::STRUCT);
                if ignored {
                    flags.insert(FieldFlags::IGNORED);
                }
                (SqlType::default(), Some(target))
            }
            FieldKind::Many(target) => {
                flags.insert(FieldFlags::SLICE);
                if ignored {
                    flags.insert(FieldFlags::IGNORED);
                }
                (SqlType::default(), Some(target))
            }
            FieldKind::Embedded(inner) => {
                if ignored {
                    continue;
                }
                if depth >= MAX_EMBED_DEPTH {
                    tracing::warn!(field = %name, "embedded records nest too deep, skipping");
                    continue;
                }
                let prefix = settings.get("EMBEDDED_PREFIX").unwrap_or_default();
                let inner_defs: Vec<FieldDef> = inner
                    .fields()
                    .into_iter()
                    .filter(|d| matches!(d.kind, FieldKind::Column(_) | FieldKind::Embedded(_)))
                    .collect();
                collect_fields(
                    out,
                    &inner_defs,
                    &format!("{name}."),
                    &format!("{column_prefix}{prefix}"),
                    true,
                    depth + 1,
                );
                continue;
            }
        };

        let db_name = match settings.get("COLUMN") {
            Some(column) => column.to_string(),
            None => format!("{column_prefix}{}", to_db_name(def.name)),
        };
        let index = out.len();
        out.push(FieldDescriptor::new(
            name, db_name, sql_type, flags, settings, target, index,
        ));
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Process- or test-scoped cache of model descriptors.
pub struct ModelRegistry {
    singular_table: bool,
    cache: RwLock<HashMap<TypeId, Arc<ModelDescriptor>>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_singular_table(false)
    }

    /// A registry that derives singular table names (`user` instead of `users`).
    #[must_use]
    pub fn with_singular_table(singular_table: bool) -> Self {
        Self {
            singular_table,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn singular_table(&self) -> bool {
        self.singular_table
    }

    /// Describe `M`, wiring its relationships on first use.
    pub fn describe<M: Model>(&self) -> Arc<ModelDescriptor> {
        self.describe_type(ModelType::of::<M>())
    }

    /// Describe a type through its handle.
    pub fn describe_type(&self, model_type: ModelType) -> Arc<ModelDescriptor> {
        let descriptor = self.describe_fields(model_type);
        descriptor
            .relationships
            .get_or_init(|| wire_relationships(self, &descriptor));
        descriptor
    }

    /// Phase-1 lookup: fields only, no wiring.
    fn describe_fields(&self, model_type: ModelType) -> Arc<ModelDescriptor> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.get(&model_type.id()) {
                return Arc::clone(hit);
            }
        }

        let built = Arc::new(ModelDescriptor::build(model_type, self.singular_table));
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.entry(model_type.id()).or_insert_with(|| {
            tracing::debug!(
                model = model_type.name(),
                table = %built.table_name,
                fields = built.fields.len(),
                primary_keys = built.primary_keys.len(),
                "described model"
            );
            Arc::clone(&built)
        });
        Arc::clone(entry)
    }

    /// Number of cached descriptors.
    pub fn len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("singular_table", &self.singular_table)
            .field("cached", &self.len())
            .finish()
    }
}

// ============================================================================
// Relationship wiring
// ============================================================================

/// `prefix` + `name` as a key column name: `("User", "id")` → `user_id`.
fn join_key(prefix: &str, name: &str) -> String {
    format!("{}_{}", to_db_name(prefix), to_db_name(name))
}

fn wire_relationships(
    registry: &ModelRegistry,
    owner: &ModelDescriptor,
) -> Vec<Option<Relationship>> {
    owner
        .fields
        .iter()
        .map(|field| {
            let target = field.target?;
            if field.is_ignored() {
                return None;
            }
            let related = registry.describe_fields(target);
            let relationship = if field.flags.contains(FieldFlags::SLICE) {
                if field.settings.has("MANY2MANY") {
                    many_to_many(owner, field, &related)
                } else {
                    has_relation(owner, field, &related, RelationshipKind::HasMany)
                }
            } else {
                has_relation(owner, field, &related, RelationshipKind::HasOne)
                    .or_else(|| belongs_to(owner, field, &related))
            };
            if relationship.is_none() {
                tracing::warn!(
                    model = owner.type_name(),
                    field = %field.name,
                    related = related.type_name(),
                    "could not infer relationship keys, field is not a relationship"
                );
            }
            relationship
        })
        .collect()
}

/// Pair declared or inferred key names, resolving foreign keys on `foreign_side`
/// and association keys on `association_side`.
fn resolve_keys<'a>(
    foreign_side: &'a ModelDescriptor,
    association_side: &'a ModelDescriptor,
    foreign_keys: &[String],
    association_keys: &[String],
) -> Option<Vec<(&'a FieldDescriptor, &'a FieldDescriptor)>> {
    if foreign_keys.is_empty() || foreign_keys.len() != association_keys.len() {
        return None;
    }
    foreign_keys
        .iter()
        .zip(association_keys)
        .map(|(fk, ak)| Some((foreign_side.key_field(fk)?, association_side.key_field(ak)?)))
        .collect()
}

fn has_relation(
    owner: &ModelDescriptor,
    field: &FieldDescriptor,
    related: &ModelDescriptor,
    kind: RelationshipKind,
) -> Option<Relationship> {
    let mut association_type = owner.type_name().to_string();
    let mut polymorphic = None;
    if let Some(poly) = field.settings.get("POLYMORPHIC") {
        if let Some(type_field) = related.key_field(&join_key(poly, "type")) {
            association_type = poly.to_string();
            type_field.mark_foreign_key();
            polymorphic = Some(Polymorphic {
                type_field: type_field.name.clone(),
                type_db_name: type_field.db_name.clone(),
                value: field
                    .settings
                    .get("POLYMORPHIC_VALUE")
                    .map_or_else(|| owner.table_name.clone(), str::to_string),
            });
        }
    }

    let mut foreign_keys = field.settings.list("FOREIGNKEY");
    let mut association_keys = field.settings.list("ASSOCIATION_FOREIGNKEY");
    if foreign_keys.is_empty() {
        if association_keys.is_empty() {
            for pk in owner.primary_fields() {
                foreign_keys.push(join_key(&association_type, &pk.name));
                association_keys.push(pk.name.clone());
            }
        } else {
            for key in &association_keys {
                let f = owner.key_field(key)?;
                foreign_keys.push(join_key(&association_type, &f.name));
            }
        }
    } else if association_keys.is_empty() {
        association_keys = owner.primary_fields().map(|f| f.name.clone()).collect();
    }

    let pairs = resolve_keys(related, owner, &foreign_keys, &association_keys)?;
    for (fk, _) in &pairs {
        fk.mark_foreign_key();
    }
    Some(Relationship {
        kind,
        field: field.name.clone(),
        target: related.model_type,
        foreign_field_names: pairs.iter().map(|(f, _)| f.name.clone()).collect(),
        foreign_db_names: pairs.iter().map(|(f, _)| f.db_name.clone()).collect(),
        association_field_names: pairs.iter().map(|(_, a)| a.name.clone()).collect(),
        association_db_names: pairs.iter().map(|(_, a)| a.db_name.clone()).collect(),
        polymorphic,
        join_table: None,
    })
}

fn belongs_to(
    owner: &ModelDescriptor,
    field: &FieldDescriptor,
    related: &ModelDescriptor,
) -> Option<Relationship> {
    let mut foreign_keys = field.settings.list("FOREIGNKEY");
    let mut association_keys = field.settings.list("ASSOCIATION_FOREIGNKEY");
    if foreign_keys.is_empty() {
        if association_keys.is_empty() {
            for pk in related.primary_fields() {
                foreign_keys.push(join_key(&field.name, &pk.name));
                association_keys.push(pk.name.clone());
            }
        } else {
            for key in &association_keys {
                let f = related.key_field(key)?;
                foreign_keys.push(join_key(&field.name, &f.name));
            }
        }
    } else if association_keys.is_empty() {
        association_keys = related.primary_fields().map(|f| f.name.clone()).collect();
    }

    let pairs = resolve_keys(owner, related, &foreign_keys, &association_keys)?;
    for (fk, _) in &pairs {
        fk.mark_foreign_key();
    }
    Some(Relationship {
        kind: RelationshipKind::BelongsTo,
        field: field.name.clone(),
        target: related.model_type,
        foreign_field_names: pairs.iter().map(|(f, _)| f.name.clone()).collect(),
        foreign_db_names: pairs.iter().map(|(f, _)| f.db_name.clone()).collect(),
        association_field_names: pairs.iter().map(|(_, a)| a.name.clone()).collect(),
        association_db_names: pairs.iter().map(|(_, a)| a.db_name.clone()).collect(),
        polymorphic: None,
        join_table: None,
    })
}

fn many_to_many(
    owner: &ModelDescriptor,
    field: &FieldDescriptor,
    related: &ModelDescriptor,
) -> Option<Relationship> {
    let table = field.settings.get("MANY2MANY")?.to_string();

    let source_fields: Vec<&FieldDescriptor> = {
        let declared = field.settings.list("FOREIGNKEY");
        if declared.is_empty() {
            owner.primary_fields().collect()
        } else {
            declared
                .iter()
                .map(|k| owner.key_field(k))
                .collect::<Option<_>>()?
        }
    };
    let destination_fields: Vec<&FieldDescriptor> = {
        let declared = field.settings.list("ASSOCIATION_FOREIGNKEY");
        if declared.is_empty() {
            related.primary_fields().collect()
        } else {
            declared
                .iter()
                .map(|k| related.key_field(k))
                .collect::<Option<_>>()?
        }
    };
    if source_fields.is_empty() || destination_fields.is_empty() {
        return None;
    }

    let source_columns = field.settings.list("JOINTABLE_FOREIGNKEY");
    let destination_columns = field.settings.list("ASSOCIATION_JOINTABLE_FOREIGNKEY");
    let self_referential = owner.model_type == related.model_type;

    let source: Vec<JoinTableForeignKey> = source_fields
        .iter()
        .enumerate()
        .map(|(i, f)| JoinTableForeignKey {
            db_name: source_columns
                .get(i)
                .cloned()
                .unwrap_or_else(|| join_key(owner.type_name(), &f.name)),
            association_db_name: f.db_name.clone(),
            field_name: f.name.clone(),
        })
        .collect();
    let destination: Vec<JoinTableForeignKey> = destination_fields
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let prefix = if self_referential {
                field.name.as_str()
            } else {
                related.type_name()
            };
            JoinTableForeignKey {
                db_name: destination_columns
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| join_key(prefix, &f.name)),
                association_db_name: f.db_name.clone(),
                field_name: f.name.clone(),
            }
        })
        .collect();

    Some(Relationship {
        kind: RelationshipKind::ManyToMany,
        field: field.name.clone(),
        target: related.model_type,
        foreign_field_names: source.iter().map(|k| k.field_name.clone()).collect(),
        foreign_db_names: source.iter().map(|k| k.db_name.clone()).collect(),
        association_field_names: destination.iter().map(|k| k.field_name.clone()).collect(),
        association_db_names: destination.iter().map(|k| k.db_name.clone()).collect(),
        polymorphic: None,
        join_table: Some(Arc::new(DefaultJoinTableHandler::new(
            table,
            source,
            destination,
        ))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::value::Value;

    macro_rules! scalar_model {
        ($ty:ident, $name:literal, [$($field:literal : $sql:expr $(=> $tag:literal)?),* $(,)?], [$($rel:expr),* $(,)?]) => {
            #[derive(Debug, Clone, Default)]
            struct $ty {
                values: HashMap<String, Value>,
            }

            impl Model for $ty {
                fn type_name() -> &'static str {
                    $name
                }

                fn fields() -> Vec<FieldDef> {
                    vec![
                        $(FieldDef::column($field, $sql)$(.tag($tag))?,)*
                        $($rel,)*
                    ]
                }

                fn get_value(&self, field: &str) -> Option<Value> {
                    self.values.get(field).cloned()
                }

                fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
                    self.values.insert(field.to_string(), value);
                    Ok(())
                }
            }
        };
    }

    scalar_model!(Struct, "Struct", ["id": SqlType::BigInt => "primary_key", "name": SqlType::Text], []);
    scalar_model!(Plain, "Plain", ["id": SqlType::BigInt, "name": SqlType::Text], []);
    scalar_model!(
        User,
        "User",
        [
            "id": SqlType::BigInt,
            "name": SqlType::Text,
            "company_id": SqlType::BigInt,
            "deleted_at": SqlType::Timestamp,
        ],
        [
            FieldDef::many::<Email>("emails"),
            FieldDef::one::<Profile>("profile"),
            FieldDef::one::<Company>("company"),
            FieldDef::many::<Language>("languages").tag("many2many:user_languages"),
            FieldDef::many::<Toy>("toys").tag("polymorphic:Owner"),
            FieldDef::one::<User>("manager").tag("foreignkey:company_id;association_foreignkey:company_id"),
            FieldDef::many::<User>("friends").tag("many2many:friendships"),
        ]
    );
    scalar_model!(Email, "Email", ["id": SqlType::BigInt, "user_id": SqlType::BigInt, "email": SqlType::Text], []);
    scalar_model!(Profile, "Profile", ["id": SqlType::BigInt, "user_id": SqlType::BigInt], []);
    scalar_model!(
        Company,
        "Company",
        ["id": SqlType::BigInt, "name": SqlType::Text],
        [FieldDef::many::<User>("users")]
    );
    scalar_model!(Language, "Language", ["code": SqlType::Text => "primary_key", "name": SqlType::Text], []);
    scalar_model!(
        Toy,
        "Toy",
        ["id": SqlType::BigInt, "owner_id": SqlType::BigInt, "owner_type": SqlType::Text],
        []
    );
    scalar_model!(
        Blog,
        "Blog",
        [
            "id": SqlType::BigInt => "primary_key",
            "locale": SqlType::Text => "primary_key",
            "subject": SqlType::Text => "column:title;size:120",
            "views": SqlType::BigInt => "default:0",
            "secret": SqlType::Text => "-",
        ],
        []
    );
    scalar_model!(Audit, "Audit", ["created_by": SqlType::Text, "updated_by": SqlType::Text], []);
    scalar_model!(
        Post,
        "Post",
        ["id": SqlType::BigInt, "title": SqlType::Text, "name": SqlType::Text => "column:title"],
        [FieldDef::embedded::<Audit>("audit").tag("embedded_prefix:audit_")]
    );

    #[derive(Debug, Clone, Default)]
    struct Empty;

    impl Model for Empty {
        fn type_name() -> &'static str {
            "Empty"
        }

        fn fields() -> Vec<FieldDef> {
            Vec::new()
        }

        fn get_value(&self, _field: &str) -> Option<Value> {
            None
        }

        fn set_value(&mut self, field: &str, _value: Value) -> Result<()> {
            Err(Error::unaddressable("Empty", field))
        }
    }

    #[test]
    fn test_describe_is_idempotent() {
        let registry = ModelRegistry::new();
        let a = registry.describe::<Struct>();
        let b = registry.describe::<Struct>();
        assert!(Arc::ptr_eq(&a, &b));
        let columns = |d: &ModelDescriptor| {
            d.normal_fields()
                .map(|f| f.db_name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(columns(&a), columns(&b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_struct_scenario_table_and_key() {
        let registry = ModelRegistry::new();
        let d = registry.describe::<Struct>();
        assert_eq!(d.table_name(), "structs");
        let pk = d.primary_field().unwrap();
        assert_eq!(pk.db_name, "id");
        assert!(pk.is_auto_increment());
        assert_eq!(d.field("name").unwrap().db_name, "name");
    }

    #[test]
    fn test_field_named_id_is_primary_key() {
        let registry = ModelRegistry::new();
        let d = registry.describe::<Plain>();
        assert_eq!(d.primary_key_count(), 1);
        assert!(d.field("id").unwrap().is_primary_key());
    }

    #[test]
    fn test_singular_table_names() {
        let registry = ModelRegistry::with_singular_table(true);
        assert_eq!(registry.describe::<Plain>().table_name(), "plain");
    }

    #[test]
    fn test_tag_settings_classify_fields() {
        let registry = ModelRegistry::new();
        let d = registry.describe::<Blog>();
        assert_eq!(d.table_name(), "blogs");
        assert_eq!(d.primary_key_count(), 2);
        assert_eq!(d.primary_field().unwrap().db_name, "id");
        assert_eq!(d.field("subject").unwrap().db_name, "title");
        assert_eq!(d.field("title").unwrap().name, "subject");
        assert!(d.field("views").unwrap().has_default());
        assert!(d.field("secret").unwrap().is_ignored());
        assert!(!d.has_column("secret"));
        assert!(!d.field("locale").unwrap().is_auto_increment());
    }

    #[test]
    fn test_duplicate_column_keeps_first() {
        let registry = ModelRegistry::new();
        let d = registry.describe::<Post>();
        assert_eq!(d.field_by_column("title").unwrap().name, "title");
        assert!(d.field("name").unwrap().is_ignored());
    }

    #[test]
    fn test_embedded_fields_are_flattened() {
        let registry = ModelRegistry::new();
        let d = registry.describe::<Post>();
        let created = d.field("audit.created_by").unwrap();
        assert_eq!(created.db_name, "audit_created_by");
        assert!(created.flags.contains(FieldFlags::EMBEDDED));
        assert!(created.is_normal());
    }

    #[test]
    fn test_relationship_kinds() {
        let registry = ModelRegistry::new();
        let user = registry.describe::<User>();

        let emails = user.relationship("emails").unwrap();
        assert_eq!(emails.kind, RelationshipKind::HasMany);
        assert_eq!(emails.foreign_db_names, vec!["user_id"]);
        assert_eq!(emails.association_db_names, vec!["id"]);

        let profile = user.relationship("profile").unwrap();
        assert_eq!(profile.kind, RelationshipKind::HasOne);

        let company = user.relationship("company").unwrap();
        assert_eq!(company.kind, RelationshipKind::BelongsTo);
        assert_eq!(company.foreign_field_names, vec!["company_id"]);
        assert!(user.field("company_id").unwrap().is_foreign_key());

        let languages = user.relationship("languages").unwrap();
        assert_eq!(languages.kind, RelationshipKind::ManyToMany);
        let handler = languages.join_table.as_ref().unwrap();
        assert_eq!(handler.table(), "user_languages");
        assert_eq!(handler.source_foreign_keys()[0].db_name, "user_id");
        assert_eq!(handler.destination_foreign_keys()[0].db_name, "language_code");
        assert_eq!(handler.destination_foreign_keys()[0].association_db_name, "code");
    }

    #[test]
    fn test_polymorphic_has_many() {
        let registry = ModelRegistry::new();
        let user = registry.describe::<User>();
        let toys = user.relationship("toys").unwrap();
        assert_eq!(toys.kind, RelationshipKind::HasMany);
        assert_eq!(toys.foreign_db_names, vec!["owner_id"]);
        let poly = toys.polymorphic.as_ref().unwrap();
        assert_eq!(poly.type_db_name, "owner_type");
        assert_eq!(poly.value, "users");
    }

    #[test]
    fn test_cyclic_types_share_cached_descriptor() {
        let registry = ModelRegistry::new();
        let company = registry.describe::<Company>();
        let users = company.relationship("users").unwrap();
        assert_eq!(users.kind, RelationshipKind::HasMany);

        let user = registry.describe::<User>();
        let manager = user.relationship("manager").unwrap();
        assert_eq!(manager.target, ModelType::of::<User>());
        assert!(Arc::ptr_eq(&user, &registry.describe::<User>()));
    }

    #[test]
    fn test_self_referential_many_to_many_columns_differ() {
        let registry = ModelRegistry::new();
        let user = registry.describe::<User>();
        let friends = user.relationship("friends").unwrap();
        let handler = friends.join_table.as_ref().unwrap();
        assert_eq!(handler.source_foreign_keys()[0].db_name, "user_id");
        assert_eq!(handler.destination_foreign_keys()[0].db_name, "friends_id");
    }

    #[test]
    fn test_fieldless_type_yields_empty_descriptor() {
        let registry = ModelRegistry::new();
        let d = registry.describe::<Empty>();
        assert!(d.fields().is_empty());
        assert!(d.primary_field().is_none());
        assert_eq!(d.table_name(), "empties");
    }

    #[test]
    fn test_concurrent_describe_returns_same_instance() {
        let registry = Arc::new(ModelRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.describe::<User>())
            })
            .collect();
        let descriptors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for d in &descriptors[1..] {
            assert!(Arc::ptr_eq(&descriptors[0], d));
        }
    }
}
