//! Field values bound to one record.
//!
//! Descriptors are shared and immutable; a [`BoundFields`] pairs one of them
//! with a concrete record so values can be read through field metadata.
//! Writes go through [`set_field`], which resolves column names the same way.

use crate::error::{Error, Result};
use crate::field::FieldDescriptor;
use crate::key::KeyTuple;
use crate::model::DynModel;
use crate::registry::ModelDescriptor;
use crate::value::Value;

/// One field of a record with its current value.
#[derive(Debug, Clone)]
pub struct BoundField<'a> {
    pub field: &'a FieldDescriptor,
    pub value: Value,
}

impl BoundField<'_> {
    pub fn is_blank(&self) -> bool {
        self.value.is_blank()
    }
}

/// Read-only view of a record's fields through its descriptor.
#[derive(Clone, Copy)]
pub struct BoundFields<'a> {
    descriptor: &'a ModelDescriptor,
    record: &'a dyn DynModel,
}

impl<'a> BoundFields<'a> {
    pub fn new(descriptor: &'a ModelDescriptor, record: &'a dyn DynModel) -> Self {
        Self { descriptor, record }
    }

    pub fn descriptor(&self) -> &'a ModelDescriptor {
        self.descriptor
    }

    /// Value of the field addressed by logical or column name.
    ///
    /// A field the record does not expose reads as NULL.
    pub fn get(&self, name: &str) -> Result<Value> {
        let field = self.resolve(name)?;
        Ok(self.record.read(&field.name).unwrap_or_default())
    }

    /// Bound field addressed by logical or column name.
    pub fn field(&self, name: &str) -> Result<BoundField<'a>> {
        let field = self.resolve(name)?;
        Ok(self.bind(field))
    }

    /// Every persisted column with its value.
    pub fn normal(&self) -> impl Iterator<Item = BoundField<'a>> + '_ {
        self.descriptor.normal_fields().map(|f| self.bind(f))
    }

    pub fn is_blank(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.is_blank())
    }

    /// Primary-key values in key order.
    pub fn primary_values(&self) -> Vec<Value> {
        self.descriptor
            .primary_fields()
            .map(|f| self.record.read(&f.name).unwrap_or_default())
            .collect()
    }

    /// Whether the record has no primary key value yet.
    pub fn primary_key_blank(&self) -> bool {
        self.descriptor.primary_field().is_none_or(|f| {
            self.record
                .read(&f.name)
                .is_none_or(|v| v.is_blank())
        })
    }

    /// Values of `names` in order, NULL for unknown fields.
    pub fn values_of(&self, names: &[String]) -> Vec<Value> {
        names
            .iter()
            .map(|n| self.get(n).unwrap_or_default())
            .collect()
    }

    /// Attributes that would change the record, keyed by column name.
    ///
    /// Known fields whose current value already equals the new one are
    /// dropped; names that resolve to no field pass through as raw columns.
    pub fn changed(&self, attrs: &[(String, Value)]) -> Vec<(String, Value)> {
        attrs
            .iter()
            .filter_map(|(name, value)| match self.descriptor.field(name) {
                Some(field) if field.is_normal() => {
                    let current = self.record.read(&field.name).unwrap_or_default();
                    let same = KeyTuple::from_values(std::slice::from_ref(&current))
                        == KeyTuple::from_values(std::slice::from_ref(value));
                    (!same).then(|| (field.db_name.clone(), value.clone()))
                }
                Some(_) => None,
                None => Some((name.clone(), value.clone())),
            })
            .collect()
    }

    fn resolve(&self, name: &str) -> Result<&'a FieldDescriptor> {
        self.descriptor
            .field(name)
            .ok_or_else(|| Error::unknown_field(self.descriptor.type_name(), name))
    }

    fn bind(&self, field: &'a FieldDescriptor) -> BoundField<'a> {
        BoundField {
            field,
            value: self.record.read(&field.name).unwrap_or_default(),
        }
    }
}

/// Write a field addressed by logical or column name.
pub fn set_field(
    descriptor: &ModelDescriptor,
    record: &mut dyn DynModel,
    name: &str,
    value: Value,
) -> Result<()> {
    let field = descriptor
        .field(name)
        .ok_or_else(|| Error::unknown_field(descriptor.type_name(), name))?;
    if field.is_relation() {
        return Err(Error::unaddressable(descriptor.type_name(), &field.name));
    }
    record.write(&field.name, value)
}
