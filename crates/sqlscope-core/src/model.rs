//! The record contract.
//!
//! Record types describe themselves explicitly instead of being inspected at
//! runtime: [`Model::fields`] lists the declared fields once, and
//! [`Model::get_value`]/[`Model::set_value`] read and write them by logical
//! name. Related records move in and out through [`Model::take_relation`] and
//! [`Model::put_relation`].
//!
//! # Example
//!
//! ```ignore
//! #[derive(Debug, Clone, Default)]
//! struct User {
//!     id: i64,
//!     name: String,
//!     emails: Vec<Email>,
//! }
//!
//! impl Model for User {
//!     fn type_name() -> &'static str {
//!         "User"
//!     }
//!
//!     fn fields() -> Vec<FieldDef> {
//!         vec![
//!             FieldDef::column("id", SqlType::BigInt),
//!             FieldDef::column("name", SqlType::Text),
//!             FieldDef::many::<Email>("emails"),
//!         ]
//!     }
//!
//!     fn get_value(&self, field: &str) -> Option<Value> {
//!         match field {
//!             "id" => Some(self.id.into()),
//!             "name" => Some(self.name.clone().into()),
//!             _ => None,
//!         }
//!     }
//!
//!     fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
//!         match field {
//!             "id" => self.id = FromValue::from_value(value)?,
//!             "name" => self.name = FromValue::from_value(value)?,
//!             _ => return Err(Error::unaddressable("User", field)),
//!         }
//!         Ok(())
//!     }
//!
//!     fn take_relation(&mut self, field: &str) -> Option<Related> {
//!         match field {
//!             "emails" => Some(Related::many(std::mem::take(&mut self.emails))),
//!             _ => None,
//!         }
//!     }
//!
//!     fn put_relation(&mut self, field: &str, related: Related) -> Result<()> {
//!         match field {
//!             "emails" => self.emails = related.into_many()?,
//!             _ => return Err(Error::unaddressable("User", field)),
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};
use crate::field::FieldDef;
use crate::value::Value;

/// Lifecycle points at which a record's own hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    BeforeSave,
    BeforeCreate,
    AfterCreate,
    AfterSave,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    AfterFind,
}

/// A record type mapped onto a table.
pub trait Model: Default + Clone + fmt::Debug + Send + Sync + 'static {
    /// Name used to derive the table name and default foreign keys.
    fn type_name() -> &'static str;

    /// Declared fields, in order.
    fn fields() -> Vec<FieldDef>;

    /// Explicit table name; `None` derives one from [`Model::type_name`].
    fn table_name() -> Option<String> {
        None
    }

    /// Read a scalar field. `None` for unknown names and relation fields.
    fn get_value(&self, field: &str) -> Option<Value>;

    /// Write a scalar field. Unknown names yield [`Error::Unaddressable`].
    fn set_value(&mut self, field: &str, value: Value) -> Result<()>;

    /// Move a relation field's records out, leaving its default behind.
    fn take_relation(&mut self, _field: &str) -> Option<Related> {
        None
    }

    /// Store records into a relation field.
    fn put_relation(&mut self, field: &str, _related: Related) -> Result<()> {
        Err(Error::unaddressable(Self::type_name(), field))
    }

    fn before_save(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_create(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_create(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_save(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_update(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_update(&mut self) -> Result<()> {
        Ok(())
    }

    fn before_delete(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_delete(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_find(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Type handles
// ============================================================================

fn new_boxed<M: Model>() -> Box<dyn DynModel> {
    Box::new(M::default())
}

/// A copyable handle to a record type.
///
/// Carries the type's identity plus the function pointers the registry and
/// the association resolver need to describe and instantiate it without
/// knowing it statically.
#[derive(Clone, Copy)]
pub struct ModelType {
    id: TypeId,
    name: &'static str,
    fields: fn() -> Vec<FieldDef>,
    table_name: fn() -> Option<String>,
    new_record: fn() -> Box<dyn DynModel>,
}

impl ModelType {
    #[must_use]
    pub fn of<M: Model>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: M::type_name(),
            fields: M::fields,
            table_name: M::table_name,
            new_record: new_boxed::<M>,
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> Vec<FieldDef> {
        (self.fields)()
    }

    pub fn table_name(&self) -> Option<String> {
        (self.table_name)()
    }

    /// A fresh default record of this type.
    pub fn new_record(&self) -> Box<dyn DynModel> {
        (self.new_record)()
    }
}

impl PartialEq for ModelType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ModelType {}

impl Hash for ModelType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelType({})", self.name)
    }
}

// ============================================================================
// Type-erased records
// ============================================================================

/// Object-safe view of any [`Model`].
///
/// Method names differ from [`Model`]'s so both traits can be in scope
/// without ambiguity.
pub trait DynModel: Any + Send + Sync + fmt::Debug {
    fn model_type(&self) -> ModelType;
    /// [`Model::get_value`]
    fn read(&self, field: &str) -> Option<Value>;
    /// [`Model::set_value`]
    fn write(&mut self, field: &str, value: Value) -> Result<()>;
    /// [`Model::take_relation`]
    fn take_related(&mut self, field: &str) -> Option<Related>;
    /// [`Model::put_relation`]
    fn put_related(&mut self, field: &str, related: Related) -> Result<()>;
    fn run_hook(&mut self, hook: Hook) -> Result<()>;
    fn clone_box(&self) -> Box<dyn DynModel>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<M: Model> DynModel for M {
    fn model_type(&self) -> ModelType {
        ModelType::of::<M>()
    }

    fn read(&self, field: &str) -> Option<Value> {
        Model::get_value(self, field)
    }

    fn write(&mut self, field: &str, value: Value) -> Result<()> {
        Model::set_value(self, field, value)
    }

    fn take_related(&mut self, field: &str) -> Option<Related> {
        Model::take_relation(self, field)
    }

    fn put_related(&mut self, field: &str, related: Related) -> Result<()> {
        Model::put_relation(self, field, related)
    }

    fn run_hook(&mut self, hook: Hook) -> Result<()> {
        match hook {
            Hook::BeforeSave => self.before_save(),
            Hook::BeforeCreate => self.before_create(),
            Hook::AfterCreate => self.after_create(),
            Hook::AfterSave => self.after_save(),
            Hook::BeforeUpdate => self.before_update(),
            Hook::AfterUpdate => self.after_update(),
            Hook::BeforeDelete => self.before_delete(),
            Hook::AfterDelete => self.after_delete(),
            Hook::AfterFind => self.after_find(),
        }
    }

    fn clone_box(&self) -> Box<dyn DynModel> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl Clone for Box<dyn DynModel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Recover the concrete record from a boxed one.
pub fn downcast<M: Model>(record: Box<dyn DynModel>) -> Result<M> {
    let found = record.model_type().name();
    record
        .into_any()
        .downcast::<M>()
        .map(|b| *b)
        .map_err(|_| Error::Conversion {
            expected: M::type_name(),
            actual: found.to_string(),
        })
}

/// Borrow the concrete record behind a `dyn DynModel`.
pub fn downcast_ref<M: Model>(record: &dyn DynModel) -> Option<&M> {
    record.as_any().downcast_ref::<M>()
}

// ============================================================================
// Relation payloads
// ============================================================================

/// Records moved in or out of a relation field.
#[derive(Debug, Clone)]
pub enum Related {
    One(Option<Box<dyn DynModel>>),
    Many(Vec<Box<dyn DynModel>>),
}

impl Related {
    pub fn one<M: Model>(record: Option<M>) -> Self {
        Related::One(record.map(|r| Box::new(r) as Box<dyn DynModel>))
    }

    pub fn many<M: Model>(records: Vec<M>) -> Self {
        Related::Many(
            records
                .into_iter()
                .map(|r| Box::new(r) as Box<dyn DynModel>)
                .collect(),
        )
    }

    /// Convert into a single typed record. A collection yields its first element.
    pub fn into_one<M: Model>(self) -> Result<Option<M>> {
        match self {
            Related::One(record) => record.map(downcast).transpose(),
            Related::Many(records) => records.into_iter().next().map(downcast).transpose(),
        }
    }

    /// Convert into a typed collection.
    pub fn into_many<M: Model>(self) -> Result<Vec<M>> {
        self.into_records().into_iter().map(downcast).collect()
    }

    /// Flatten into boxed records.
    pub fn into_records(self) -> Vec<Box<dyn DynModel>> {
        match self {
            Related::One(record) => record.into_iter().collect(),
            Related::Many(records) => records,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Related::One(record) => usize::from(record.is_some()),
            Related::Many(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Route a dotted embedded field name to the embedded record.
///
/// Returns the inner field name when `field` starts with `"{prefix}."`.
pub fn embedded_field<'a>(field: &'a str, prefix: &str) -> Option<&'a str> {
    field
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SqlType;
    use crate::value::FromValue;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Tag {
        id: i64,
        name: String,
    }

    impl Model for Tag {
        fn type_name() -> &'static str {
            "Tag"
        }

        fn fields() -> Vec<FieldDef> {
            vec![
                FieldDef::column("id", SqlType::BigInt),
                FieldDef::column("name", SqlType::Text),
            ]
        }

        fn get_value(&self, field: &str) -> Option<Value> {
            match field {
                "id" => Some(self.id.into()),
                "name" => Some(self.name.clone().into()),
                _ => None,
            }
        }

        fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
            match field {
                "id" => self.id = FromValue::from_value(value)?,
                "name" => self.name = FromValue::from_value(value)?,
                _ => return Err(Error::unaddressable("Tag", field)),
            }
            Ok(())
        }

        fn before_save(&mut self) -> Result<()> {
            self.name = self.name.trim().to_string();
            Ok(())
        }
    }

    #[test]
    fn test_model_type_identity() {
        let a = ModelType::of::<Tag>();
        let b = ModelType::of::<Tag>();
        assert_eq!(a, b);
        assert_eq!(a.name(), "Tag");
        assert_eq!(a.fields().len(), 2);
    }

    #[test]
    fn test_dyn_roundtrip_and_downcast() {
        let mut record: Box<dyn DynModel> = ModelType::of::<Tag>().new_record();
        record.write("id", Value::BigInt(3)).unwrap();
        record.write("name", Value::Text(" rust ".into())).unwrap();
        record.run_hook(Hook::BeforeSave).unwrap();
        let tag: Tag = downcast(record).unwrap();
        assert_eq!(
            tag,
            Tag {
                id: 3,
                name: "rust".into()
            }
        );
    }

    #[test]
    fn test_set_unknown_field_is_unaddressable() {
        let mut tag = Tag::default();
        let err = Model::set_value(&mut tag, "missing", Value::Null).unwrap_err();
        assert!(matches!(err, Error::Unaddressable { .. }));
    }

    #[test]
    fn test_related_conversions() {
        let related = Related::many(vec![Tag::default(), Tag::default()]);
        assert_eq!(related.len(), 2);
        let tags: Vec<Tag> = related.into_many().unwrap();
        assert_eq!(tags.len(), 2);

        let single = Related::one(Some(Tag::default()));
        assert!(single.into_one::<Tag>().unwrap().is_some());
    }

    #[test]
    fn test_embedded_field_routing() {
        assert_eq!(embedded_field("audit.created_at", "audit"), Some("created_at"));
        assert_eq!(embedded_field("auditor", "audit"), None);
    }
}
