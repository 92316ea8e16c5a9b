//! Eager loading of relationships for already-queried records.
//!
//! Each preload path is walked one segment at a time. Every hop issues a
//! single query for all owners at that level and hands the results out by
//! key, so `preload("books.author")` over a hundred authors costs three
//! queries, not two hundred.

use std::collections::{HashMap, HashSet};

use sqlscope_core::{
    DynModel, Error, Hook, KeyTuple, ModelDescriptor, Related, Relationship, RelationshipKind,
    Result, Value, quote_path,
};
use sqlscope_query::{Arg, Search, args};

use crate::association::key_condition;
use crate::db::Db;
use crate::scope::{Scope, ScopeValue, scan_record};

/// How one owner held its children while they were flattened for the next hop.
enum Shape {
    One(bool),
    Many(usize),
    Missing,
}

fn read_all(record: &dyn DynModel, fields: &[String]) -> Vec<Value> {
    fields
        .iter()
        .map(|name| record.read(name).unwrap_or_default())
        .collect()
}

/// Distinct, non-null key tuples of `records`, in first-seen order.
fn distinct_keys(records: &[Box<dyn DynModel>], fields: &[String]) -> Vec<Vec<Value>> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for record in records {
        let values = read_all(record.as_ref(), fields);
        let key = KeyTuple::from_values(&values);
        if !key.is_null() && seen.insert(key) {
            keys.push(values);
        }
    }
    keys
}

fn group_by(records: Vec<Box<dyn DynModel>>, fields: &[String]) -> HashMap<KeyTuple, Vec<Box<dyn DynModel>>> {
    let mut groups: HashMap<KeyTuple, Vec<Box<dyn DynModel>>> = HashMap::new();
    for record in records {
        let key = KeyTuple::from_values(&read_all(record.as_ref(), fields));
        groups.entry(key).or_default().push(record);
    }
    groups
}

struct Preloader<'a> {
    db: &'a Db,
    unscoped: bool,
    loaded: HashSet<String>,
}

impl<'a> Preloader<'a> {
    fn new(db: &'a Db, unscoped: bool) -> Self {
        Self {
            db,
            unscoped,
            loaded: HashSet::new(),
        }
    }

    fn walk(
        &mut self,
        descriptor: &ModelDescriptor,
        records: &mut [Box<dyn DynModel>],
        prefix: &str,
        segments: &[&str],
        conditions: Option<&Search>,
    ) -> Result<()> {
        let Some((segment, rest)) = segments.split_first() else {
            return Ok(());
        };
        let field = descriptor
            .field(segment)
            .ok_or_else(|| Error::unknown_field(descriptor.type_name(), segment))?;
        let relationship = descriptor
            .relationship(&field.name)
            .ok_or_else(|| Error::UnsupportedRelation {
                model: descriptor.type_name().to_string(),
                field: (*segment).to_string(),
            })?;
        let path = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{prefix}.{}", field.name)
        };

        if self.loaded.insert(path.clone()) {
            let hop_conditions = if rest.is_empty() { conditions } else { None };
            tracing::debug!(path = %path, kind = relationship.kind.as_str(), "preloading");
            match relationship.kind {
                RelationshipKind::HasOne | RelationshipKind::HasMany => {
                    self.load_has(relationship, records, hop_conditions)?;
                }
                RelationshipKind::BelongsTo => {
                    self.load_belongs_to(relationship, records, hop_conditions)?;
                }
                RelationshipKind::ManyToMany => {
                    self.load_many_to_many(relationship, records, hop_conditions)?;
                }
            }
        }
        if rest.is_empty() {
            return Ok(());
        }

        let mut shapes = Vec::with_capacity(records.len());
        let mut children = Vec::new();
        for record in records.iter_mut() {
            match record.take_related(&relationship.field) {
                Some(Related::One(Some(child))) => {
                    shapes.push(Shape::One(true));
                    children.push(child);
                }
                Some(Related::One(None)) => shapes.push(Shape::One(false)),
                Some(Related::Many(list)) => {
                    shapes.push(Shape::Many(list.len()));
                    children.extend(list);
                }
                None => shapes.push(Shape::Missing),
            }
        }
        let related = self.db.registry().describe_type(relationship.target);
        let result = self.walk(&related, &mut children, &path, rest, conditions);

        let mut children = children.into_iter();
        for (record, shape) in records.iter_mut().zip(shapes) {
            let restored = match shape {
                Shape::One(true) => Related::One(children.next()),
                Shape::One(false) => Related::One(None),
                Shape::Many(count) => Related::Many(children.by_ref().take(count).collect()),
                Shape::Missing => continue,
            };
            record.put_related(&relationship.field, restored)?;
        }
        result
    }

    fn search(&self, search: Search, conditions: Option<&Search>) -> Search {
        let search = if self.unscoped { search.unscoped() } else { search };
        match conditions {
            Some(extra) => search.merge(extra.clone()),
            None => search,
        }
    }

    fn find(&self, relationship: &Relationship, search: Search) -> Result<Vec<Box<dyn DynModel>>> {
        let mut scope = self.db.new_scope(ScopeValue::Many {
            model: relationship.target,
            records: Vec::new(),
        });
        *scope.search_mut() = search;
        scope.find()?;
        Ok(scope.into_value().into_records())
    }

    fn load_has(
        &self,
        relationship: &Relationship,
        records: &mut [Box<dyn DynModel>],
        conditions: Option<&Search>,
    ) -> Result<()> {
        let many = relationship.kind == RelationshipKind::HasMany;
        let keys = distinct_keys(records, &relationship.association_field_names);
        let mut groups = HashMap::new();
        if !keys.is_empty() {
            let dialect = self.db.dialect();
            let related = self.db.registry().describe_type(relationship.target);
            let table = quote_path(dialect, related.table_name());
            let (sql, args) = key_condition(dialect, &table, &relationship.foreign_db_names, &keys, false);
            let mut search = Search::new().filter(sql, args);
            if let Some(polymorphic) = &relationship.polymorphic {
                search = search.filter(
                    format!("{table}.{} = ?", dialect.quote(&polymorphic.type_db_name)),
                    args![polymorphic.value.clone()],
                );
            }
            let children = self.find(relationship, self.search(search, conditions))?;
            groups = group_by(children, &relationship.foreign_field_names);
        }

        for record in records.iter_mut() {
            let key = KeyTuple::from_values(&read_all(record.as_ref(), &relationship.association_field_names));
            let matched = groups.get(&key).cloned().unwrap_or_default();
            let related = if many {
                Related::Many(matched)
            } else {
                Related::One(matched.into_iter().next())
            };
            record.put_related(&relationship.field, related)?;
        }
        Ok(())
    }

    fn load_belongs_to(
        &self,
        relationship: &Relationship,
        records: &mut [Box<dyn DynModel>],
        conditions: Option<&Search>,
    ) -> Result<()> {
        let keys = distinct_keys(records, &relationship.foreign_field_names);
        if keys.is_empty() {
            return Ok(());
        }
        let dialect = self.db.dialect();
        let related = self.db.registry().describe_type(relationship.target);
        let table = quote_path(dialect, related.table_name());
        let (sql, args) = key_condition(dialect, &table, &relationship.association_db_names, &keys, false);
        let parents = self.find(relationship, self.search(Search::new().filter(sql, args), conditions))?;
        let parents = group_by(parents, &relationship.association_field_names);

        for record in records.iter_mut() {
            let key = KeyTuple::from_values(&read_all(record.as_ref(), &relationship.foreign_field_names));
            if let Some(parent) = parents.get(&key).and_then(|found| found.first()) {
                record.put_related(&relationship.field, Related::One(Some(parent.clone())))?;
            }
        }
        Ok(())
    }

    fn load_many_to_many(
        &self,
        relationship: &Relationship,
        records: &mut [Box<dyn DynModel>],
        conditions: Option<&Search>,
    ) -> Result<()> {
        let handler = relationship
            .join_table
            .as_ref()
            .ok_or_else(|| Error::UnsupportedRelation {
                model: relationship.target.name().to_string(),
                field: relationship.field.clone(),
            })?;
        let dialect = self.db.dialect();
        let related = self.db.registry().describe_type(relationship.target);
        let table = quote_path(dialect, related.table_name());
        let join_table = dialect.quote(handler.table());
        let source_keys = handler.source_foreign_keys();

        let sources: Vec<&dyn DynModel> = records.iter().map(|r| &**r).collect();
        let clause = handler.join_with(dialect, related.table_name(), &sources);
        let mut select = vec![format!("{table}.*")];
        select.extend(
            source_keys
                .iter()
                .map(|k| format!("{join_table}.{}", dialect.quote(&k.db_name))),
        );
        let search = Search::new()
            .select(select.join(", "), args![])
            .joins(clause.joins, args![])
            .filter(clause.condition, clause.args.into_iter().map(Arg::Value).collect());

        let mut scope = self.db.new_scope(ScopeValue::Many {
            model: relationship.target,
            records: Vec::new(),
        });
        *scope.search_mut() = self.search(search, conditions);
        let rows = scope.query_rows()?;

        let mut groups: HashMap<KeyTuple, Vec<Box<dyn DynModel>>> = HashMap::new();
        for row in &rows {
            let mut record = scan_record(&related, row)?;
            record.run_hook(Hook::AfterFind)?;
            let source: Vec<Value> = source_keys
                .iter()
                .map(|k| row.get_named_last(&k.db_name).cloned().unwrap_or_default())
                .collect();
            groups.entry(KeyTuple::from_values(&source)).or_default().push(record);
        }

        let owner_fields: Vec<String> = source_keys.iter().map(|k| k.field_name.clone()).collect();
        for record in records.iter_mut() {
            let key = KeyTuple::from_values(&read_all(record.as_ref(), &owner_fields));
            let matched = groups.get(&key).cloned().unwrap_or_default();
            record.put_related(&relationship.field, Related::Many(matched))?;
        }
        Ok(())
    }
}

/// Load every preload path of the scope's search into its records.
#[tracing::instrument(level = "debug", skip(scope), fields(model = scope.type_name()))]
pub fn preload(scope: &mut Scope) {
    let preloads = scope.search().preloads().to_vec();
    if preloads.is_empty() {
        return;
    }
    let Some(descriptor) = scope.descriptor().cloned() else {
        return;
    };
    let unscoped = scope.search().is_unscoped();
    let (db, records) = scope.split_records();
    let mut preloader = Preloader::new(db, unscoped);
    let mut result = Ok(());
    for preload in &preloads {
        let segments: Vec<&str> = preload.path.split('.').collect();
        result = preloader.walk(&descriptor, records, "", &segments, preload.conditions.as_deref());
        if result.is_err() {
            break;
        }
    }
    scope.check(result);
}
