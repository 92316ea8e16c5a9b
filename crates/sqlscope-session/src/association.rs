//! Reading and changing one relationship of one owner record.
//!
//! [`Association`] is the explicit counterpart of the save-time hooks: it
//! links, replaces and unlinks related records without rewriting the owner's
//! other columns.
//!
//! ```ignore
//! let mut author: Author = db.first()?;
//! let mut tags = db.association(&mut author, "tags")?;
//! tags.append(vec![Tag::named("rust")])?;
//! assert_eq!(tags.count()?, 1);
//! tags.clear()?;
//! ```
//!
//! Unlinking never deletes related rows. Has-one and has-many children get
//! their foreign keys set to NULL, many-to-many links are removed from the
//! join table, and a belongs-to owner gets its own foreign key cleared.

use std::collections::HashSet;
use std::sync::Arc;

use sqlscope_core::{
    BoundFields, Connection, Dialect, DynModel, Error, Errors, JoinTableHandler, KeyTuple, LinkSelection,
    Model, ModelDescriptor, ModelType, Related, Relationship, RelationshipKind, Result, Value,
    quote_path,
};
use sqlscope_query::{Arg, Search, args, placeholders};

use crate::db::Db;
use crate::scope::{Scope, ScopeValue};
use crate::settings::{SAVE_ASSOCIATIONS, UPDATE_COLUMN, UPDATE_INTERFACE};

// ============================================================================
// Shared helpers
// ============================================================================

/// The relationship declared on `field`.
pub fn relationship_of<'d>(descriptor: &'d ModelDescriptor, field: &str) -> Result<&'d Relationship> {
    let found = descriptor
        .field(field)
        .ok_or_else(|| Error::unknown_field(descriptor.type_name(), field))?;
    descriptor
        .relationship(&found.name)
        .ok_or_else(|| Error::UnsupportedRelation {
            model: descriptor.type_name().to_string(),
            field: field.to_string(),
        })
}

/// `"t"."c" IN (?)` for one column, `("t"."a","t"."b") IN ((?,?),(?,?))` for
/// composite keys. With `negate` the operator is `NOT IN`.
///
/// Composite keys need at least one tuple.
pub(crate) fn key_condition(
    dialect: &dyn Dialect,
    table: &str,
    columns: &[String],
    tuples: &[Vec<Value>],
    negate: bool,
) -> (String, Vec<Arg>) {
    let operator = if negate { "NOT IN" } else { "IN" };
    let qualified: Vec<String> = columns
        .iter()
        .map(|c| format!("{table}.{}", dialect.quote(c)))
        .collect();
    if let [column] = qualified.as_slice() {
        let values = tuples.iter().filter_map(|t| t.first().cloned()).collect();
        return (format!("{column} {operator} (?)"), vec![Arg::List(values)]);
    }
    let groups = vec![format!("({})", placeholders(columns.len())); tuples.len()].join(",");
    let args = tuples.iter().flatten().cloned().map(Arg::Value).collect();
    (format!("({}) {operator} ({groups})", qualified.join(",")), args)
}

fn read_all(record: &dyn DynModel, fields: &[String]) -> Vec<Value> {
    fields
        .iter()
        .map(|name| record.read(name).unwrap_or_default())
        .collect()
}

fn join_table(relationship: &Relationship) -> Result<&Arc<dyn JoinTableHandler>> {
    relationship
        .join_table
        .as_ref()
        .ok_or_else(|| Error::UnsupportedRelation {
            model: relationship.target.name().to_string(),
            field: relationship.field.clone(),
        })
}

/// Search for the records related to `owner` through `relationship`.
pub fn related_search(db: &Db, relationship: &Relationship, owner: &dyn DynModel) -> Result<Search> {
    let dialect = db.dialect();
    let related = db.registry().describe_type(relationship.target);
    let table = quote_path(dialect, related.table_name());

    let search = match relationship.kind {
        RelationshipKind::HasOne | RelationshipKind::HasMany => {
            let keys = read_all(owner, &relationship.association_field_names);
            let (sql, args) = key_condition(dialect, &table, &relationship.foreign_db_names, &[keys], false);
            let mut search = Search::new().filter(sql, args);
            if let Some(polymorphic) = &relationship.polymorphic {
                search = search.filter(
                    format!("{table}.{} = ?", dialect.quote(&polymorphic.type_db_name)),
                    args![polymorphic.value.clone()],
                );
            }
            search
        }
        RelationshipKind::BelongsTo => {
            let keys = read_all(owner, &relationship.foreign_field_names);
            let (sql, args) = key_condition(dialect, &table, &relationship.association_db_names, &[keys], false);
            Search::new().filter(sql, args)
        }
        RelationshipKind::ManyToMany => {
            let clause = join_table(relationship)?.join_with(dialect, related.table_name(), &[owner]);
            Search::new()
                .select(format!("{table}.*"), args![])
                .joins(clause.joins, args![])
                .filter(clause.condition, clause.args.into_iter().map(Arg::Value).collect())
        }
    };
    Ok(search)
}

/// Create the join table of a many-to-many relationship if the database does
/// not have it yet. Tables seen once are remembered for the handle's lifetime.
pub fn ensure_join_table(db: &Db, owner: &ModelDescriptor, relationship: &Relationship) -> Result<()> {
    let handler = join_table(relationship)?;
    let table = handler.table();
    if db.knows_join_table(table) {
        return Ok(());
    }
    let dialect = db.dialect();
    if !dialect.has_table(&db.conn(), table)? {
        let related = db.registry().describe_type(relationship.target);
        let sides = [
            (owner, handler.source_foreign_keys()),
            (&*related, handler.destination_foreign_keys()),
        ];
        let mut columns = Vec::new();
        let mut keys = Vec::new();
        for (descriptor, foreign_keys) in sides {
            for key in foreign_keys {
                let field = descriptor
                    .field(&key.field_name)
                    .ok_or_else(|| Error::unknown_field(descriptor.type_name(), &key.field_name))?;
                let column = field.as_join_table_key(&key.db_name);
                columns.push(format!(
                    "{} {}",
                    dialect.quote(&key.db_name),
                    dialect.data_type_of(&column)
                ));
                keys.push(dialect.quote(&key.db_name));
            }
        }
        let sql = format!(
            "CREATE TABLE {} ({}, PRIMARY KEY ({}))",
            dialect.quote(table),
            columns.join(","),
            keys.join(",")
        );
        tracing::debug!(table, "creating join table");
        db.conn().execute(&sql, &[])?;
    }
    db.mark_join_table(table);
    Ok(())
}

// ============================================================================
// Association
// ============================================================================

/// Operations on the relationship `field` of one saved owner record.
///
/// Every method returns its own result and also keeps the error, so a chain
/// of calls can be checked once with [`Association::error`].
pub struct Association<'a, M: Model> {
    db: Db,
    owner: &'a mut M,
    descriptor: Arc<ModelDescriptor>,
    relationship: Relationship,
    errors: Errors,
}

impl<'a, M: Model> Association<'a, M> {
    pub(crate) fn new(db: Db, owner: &'a mut M, field: &str) -> Result<Self> {
        let descriptor = db.describe::<M>();
        let relationship = relationship_of(&descriptor, field)?.clone();
        if BoundFields::new(&descriptor, &*owner).primary_key_blank() {
            return Err(Error::custom(format!(
                "{} has no primary key; save it before using its {field} association",
                descriptor.type_name()
            )));
        }
        Ok(Self {
            db,
            owner,
            descriptor,
            relationship,
            errors: Errors::default(),
        })
    }

    pub fn relationship(&self) -> &Relationship {
        &self.relationship
    }

    /// Every error reported so far, folded into one.
    pub fn error(&self) -> Option<Error> {
        self.errors.clone().into_error()
    }

    /// Related records, read from the database.
    pub fn find<R: Model>(&mut self) -> Result<Vec<R>> {
        let result = self.check_target::<R>().and_then(|()| {
            let mut scope = self.related_scope()?;
            scope.find()?;
            scope.into_value().into_many()
        });
        self.track(result)
    }

    /// Number of related rows in the database.
    pub fn count(&mut self) -> Result<i64> {
        let result = self.related_scope().and_then(|mut scope| scope.count());
        self.track(result)
    }

    /// Link `records` to the owner, saving them as needed, and add them to
    /// the owner's field. Has-one and belongs-to fields keep the last record.
    pub fn append<R: Model>(&mut self, records: Vec<R>) -> Result<()> {
        let result = self
            .check_target::<R>()
            .and_then(|()| self.append_records(boxed(records)));
        self.track(result)
    }

    /// Make `records` the complete set of related records, unlinking the rest.
    pub fn replace<R: Model>(&mut self, records: Vec<R>) -> Result<()> {
        let result = self
            .check_target::<R>()
            .and_then(|()| self.replace_records(boxed(records)));
        self.track(result)
    }

    /// Unlink `records` from the owner and drop them from its field.
    pub fn delete<R: Model>(&mut self, records: &[R]) -> Result<()> {
        let result = self.check_target::<R>().and_then(|()| {
            let records: Vec<Box<dyn DynModel>> = records.iter().map(|r| r.clone_box()).collect();
            self.delete_records(&records)
        });
        self.track(result)
    }

    /// Unlink every related record and empty the owner's field.
    pub fn clear(&mut self) -> Result<()> {
        let result = self.replace_records(Vec::new());
        self.track(result)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            tracing::debug!(field = %self.relationship.field, error = %err, "association error");
            self.errors.push(err.clone());
        }
        result
    }

    fn check_target<R: Model>(&self) -> Result<()> {
        if ModelType::of::<R>() == self.relationship.target {
            Ok(())
        } else {
            Err(Error::Conversion {
                expected: self.relationship.target.name(),
                actual: R::type_name().to_string(),
            })
        }
    }

    fn related_descriptor(&self) -> Arc<ModelDescriptor> {
        self.db.registry().describe_type(self.relationship.target)
    }

    fn related_scope(&self) -> Result<Scope> {
        let search = related_search(&self.db, &self.relationship, &*self.owner)?;
        let mut scope = self.db.new_scope(ScopeValue::Many {
            model: self.relationship.target,
            records: Vec::new(),
        });
        *scope.search_mut() = search;
        Ok(scope)
    }

    fn save_record(&self, record: Box<dyn DynModel>) -> Result<Box<dyn DynModel>> {
        let mut scope = self.db.new_scope(ScopeValue::One(record));
        scope.save()?;
        scope
            .into_value()
            .into_records()
            .pop()
            .ok_or(Error::RecordNotFound)
    }

    /// Fields identifying a related record on the other side of the link.
    fn related_key_fields(&self, related: &ModelDescriptor) -> Vec<String> {
        match self.relationship.kind {
            RelationshipKind::BelongsTo | RelationshipKind::ManyToMany => {
                self.relationship.association_field_names.clone()
            }
            RelationshipKind::HasOne | RelationshipKind::HasMany => {
                related.primary_fields().map(|f| f.name.clone()).collect()
            }
        }
    }

    fn field_records(&mut self) -> Result<Vec<Box<dyn DynModel>>> {
        let field = &self.relationship.field;
        let Some(current) = self.owner.take_relation(field) else {
            return Ok(Vec::new());
        };
        let records = current.clone().into_records();
        self.owner.put_relation(field, current)?;
        Ok(records)
    }

    fn extend_field(&mut self, mut records: Vec<Box<dyn DynModel>>) -> Result<()> {
        let field = &self.relationship.field;
        let current = self.owner.take_relation(field);
        let related = match self.relationship.kind {
            RelationshipKind::HasOne | RelationshipKind::BelongsTo => match records.pop() {
                Some(record) => Related::One(Some(record)),
                None => current.unwrap_or(Related::One(None)),
            },
            RelationshipKind::HasMany | RelationshipKind::ManyToMany => {
                let mut all = current.map(Related::into_records).unwrap_or_default();
                all.extend(records);
                Related::Many(all)
            }
        };
        self.owner.put_relation(field, related)
    }

    fn append_records(&mut self, records: Vec<Box<dyn DynModel>>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if self.relationship.kind == RelationshipKind::ManyToMany {
            let handler = Arc::clone(join_table(&self.relationship)?);
            let related = self.related_descriptor();
            ensure_join_table(&self.db, &self.descriptor, &self.relationship)?;
            let mut linked = Vec::with_capacity(records.len());
            for record in records {
                let record = if BoundFields::new(&related, record.as_ref()).primary_key_blank() {
                    self.save_record(record)?
                } else {
                    record
                };
                handler.add(&self.db.conn(), self.db.dialect(), &*self.owner, record.as_ref())?;
                linked.push(record);
            }
            return self.extend_field(linked);
        }

        // the owner's save writes the keys: children through the
        // after-save hook, a belongs-to parent through the owner's own column
        self.extend_field(records)?;
        let field = self.relationship.field.clone();
        self.db.select(field, args![]).save(&mut *self.owner)
    }

    fn replace_records(&mut self, records: Vec<Box<dyn DynModel>>) -> Result<()> {
        self.owner.take_relation(&self.relationship.field);
        let appending = !records.is_empty();
        self.append_records(records)?;
        let kept = self.field_records()?;
        let kept: Vec<&dyn DynModel> = kept.iter().map(|r| &**r).collect();

        match self.relationship.kind {
            RelationshipKind::BelongsTo => {
                if !appending {
                    self.clear_owner_keys()?;
                }
            }
            RelationshipKind::ManyToMany => {
                let handler = join_table(&self.relationship)?;
                handler.remove(
                    &self.db.conn(),
                    self.db.dialect(),
                    &*self.owner,
                    LinkSelection::Except(&kept),
                )?;
            }
            RelationshipKind::HasOne | RelationshipKind::HasMany => {
                self.unlink_children(LinkSelection::Except(&kept))?;
            }
        }
        Ok(())
    }

    fn delete_records(&mut self, records: &[Box<dyn DynModel>]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let related = self.related_descriptor();
        let key_fields = self.related_key_fields(&related);
        let deleting: HashSet<KeyTuple> = records
            .iter()
            .map(|r| KeyTuple::from_values(&read_all(r.as_ref(), &key_fields)))
            .collect();
        let refs: Vec<&dyn DynModel> = records.iter().map(|r| &**r).collect();

        match self.relationship.kind {
            RelationshipKind::ManyToMany => {
                let handler = join_table(&self.relationship)?;
                handler.remove(
                    &self.db.conn(),
                    self.db.dialect(),
                    &*self.owner,
                    LinkSelection::Only(&refs),
                )?;
            }
            RelationshipKind::HasOne | RelationshipKind::HasMany => {
                self.unlink_children(LinkSelection::Only(&refs))?;
            }
            RelationshipKind::BelongsTo => {
                let owner_key = KeyTuple::from_values(&read_all(
                    &*self.owner,
                    &self.relationship.foreign_field_names,
                ));
                if deleting.contains(&owner_key) {
                    self.clear_owner_keys()?;
                }
            }
        }

        let field = &self.relationship.field;
        let keep = |record: &dyn DynModel| {
            !deleting.contains(&KeyTuple::from_values(&read_all(record, &key_fields)))
        };
        let remaining = match self.owner.take_relation(field) {
            Some(Related::One(record)) => Related::One(record.filter(|r| keep(r.as_ref()))),
            Some(Related::Many(records)) => {
                Related::Many(records.into_iter().filter(|r| keep(r.as_ref())).collect())
            }
            None => return Ok(()),
        };
        self.owner.put_relation(field, remaining)
    }

    /// Set the owner's belongs-to foreign key columns to NULL.
    fn clear_owner_keys(&mut self) -> Result<()> {
        let attrs: Vec<(String, Value)> = self
            .relationship
            .foreign_db_names
            .iter()
            .map(|column| (column.clone(), Value::Null))
            .collect();
        self.db.update_columns(&mut *self.owner, attrs)?;
        Ok(())
    }

    /// Set the foreign keys of the owner's has-one/has-many children to NULL.
    fn unlink_children(&self, selection: LinkSelection<'_>) -> Result<u64> {
        let related = self.related_descriptor();
        let dialect = self.db.dialect();
        let table = quote_path(dialect, related.table_name());
        let owner_keys = read_all(&*self.owner, &self.relationship.association_field_names);

        let (sql, args) = key_condition(dialect, &table, &self.relationship.foreign_db_names, &[owner_keys], false);
        let mut db = self.db.filter(sql, args);
        if let Some(polymorphic) = &self.relationship.polymorphic {
            db = db.filter(
                format!("{table}.{} = ?", dialect.quote(&polymorphic.type_db_name)),
                args![polymorphic.value.clone()],
            );
        }

        let pk_columns: Vec<String> = related.primary_fields().map(|f| f.db_name.clone()).collect();
        let pk_fields: Vec<String> = related.primary_fields().map(|f| f.name.clone()).collect();
        let tuples = |records: &[&dyn DynModel]| -> Vec<Vec<Value>> {
            records.iter().map(|r| read_all(*r, &pk_fields)).collect()
        };
        match selection {
            LinkSelection::All | LinkSelection::Except([]) => {}
            LinkSelection::Only([]) => return Ok(0),
            LinkSelection::Only(records) => {
                let (sql, args) = key_condition(dialect, &table, &pk_columns, &tuples(records), false);
                db = db.filter(sql, args);
            }
            LinkSelection::Except(records) => {
                let (sql, args) = key_condition(dialect, &table, &pk_columns, &tuples(records), true);
                db = db.filter(sql, args);
            }
        }

        let nulls: Vec<(String, Value)> = self
            .relationship
            .foreign_db_names
            .iter()
            .map(|column| (column.clone(), Value::Null))
            .collect();
        let mut scope = db
            .set(UPDATE_COLUMN, true)
            .set(SAVE_ASSOCIATIONS, false)
            .new_scope(ScopeValue::Many {
                model: self.relationship.target,
                records: Vec::new(),
            });
        scope.instance_set(UPDATE_INTERFACE, nulls);
        scope.update()?;
        Ok(scope.rows_affected())
    }
}

fn boxed<R: Model>(records: Vec<R>) -> Vec<Box<dyn DynModel>> {
    records
        .into_iter()
        .map(|r| Box::new(r) as Box<dyn DynModel>)
        .collect()
}
