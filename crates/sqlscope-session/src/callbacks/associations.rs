//! Saving related records together with their owner.
//!
//! Belongs-to records are saved before the owner so the owner's foreign key
//! can be filled in; has-one, has-many and many-to-many records are saved
//! after it, once the owner's key is known.
//!
//! Each relationship field is governed by three switches, all on by default:
//!
//! | switch | setting | tag |
//! |---|---|---|
//! | update related records that have a key | `sqlscope:association_autoupdate` | `association_autoupdate` |
//! | create related records without a key | `sqlscope:association_autocreate` | `association_autocreate` |
//! | write foreign keys and join-table links | `sqlscope:association_save_reference` | `association_save_reference` |
//!
//! `sqlscope:save_associations` (or the `save_associations` tag) sets all
//! three at once. Tags are applied after settings and win.

use sqlscope_core::{
    BoundFields, DynModel, FieldDescriptor, ModelDescriptor, Related, Relationship,
    RelationshipKind, Value, set_field,
};

use crate::association::ensure_join_table;
use crate::scope::{Scope, ScopeValue};
use crate::settings::{
    ASSOCIATION_AUTOCREATE, ASSOCIATION_AUTOUPDATE, ASSOCIATION_SAVE_REFERENCE, SAVE_ASSOCIATIONS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SavePolicy {
    auto_update: bool,
    auto_create: bool,
    save_reference: bool,
}

impl SavePolicy {
    fn all(enabled: bool) -> Self {
        Self {
            auto_update: enabled,
            auto_create: enabled,
            save_reference: enabled,
        }
    }
}

/// The switches for one relationship field, or `None` when the field is not
/// written by this operation.
fn save_policy(scope: &Scope, field: &FieldDescriptor) -> Option<SavePolicy> {
    if field.is_ignored() || !scope.search().changeable(field) {
        return None;
    }
    let settings = scope.settings();
    let tags = &field.settings;

    let mut policy = SavePolicy::all(true);
    if let Some(enabled) = settings.flag(SAVE_ASSOCIATIONS) {
        policy = SavePolicy::all(enabled);
    }
    if let Some(enabled) = tags.flag("SAVE_ASSOCIATIONS") {
        policy = SavePolicy::all(enabled);
    }
    if let Some(enabled) = settings.flag(ASSOCIATION_AUTOUPDATE) {
        policy.auto_update = enabled;
    }
    if let Some(enabled) = tags.flag("ASSOCIATION_AUTOUPDATE") {
        policy.auto_update = enabled;
    }
    if let Some(enabled) = settings.flag(ASSOCIATION_AUTOCREATE) {
        policy.auto_create = enabled;
    }
    if let Some(enabled) = tags.flag("ASSOCIATION_AUTOCREATE") {
        policy.auto_create = enabled;
    }
    if let Some(enabled) = settings.flag(ASSOCIATION_SAVE_REFERENCE) {
        policy.save_reference = enabled;
    }
    if let Some(enabled) = tags.flag("ASSOCIATION_SAVE_REFERENCE") {
        policy.save_reference = enabled;
    }
    Some(policy)
}

fn owner_mut(scope: &mut Scope) -> Option<&mut Box<dyn DynModel>> {
    match scope.value_mut() {
        ScopeValue::One(record) => Some(record),
        _ => None,
    }
}

/// Move a non-empty relation out of the owner. Empty relations are left in place.
fn take_relation(scope: &mut Scope, field: &str) -> Option<Related> {
    let related = owner_mut(scope)?.take_related(field)?;
    if related.is_empty() {
        put_relation(scope, field, related);
        return None;
    }
    Some(related)
}

fn put_relation(scope: &mut Scope, field: &str, related: Related) {
    let result = match owner_mut(scope) {
        Some(owner) => owner.put_related(field, related),
        None => Ok(()),
    };
    scope.check(result);
}

/// Create or update one related record through a nested scope, returning it
/// with any generated values filled in.
fn save_related(
    scope: &mut Scope,
    record: Box<dyn DynModel>,
    policy: SavePolicy,
) -> Option<Box<dyn DynModel>> {
    let mut nested = scope.new_scope(ScopeValue::One(record));
    let blank_key = nested.primary_key_zero();
    if (blank_key && policy.auto_create) || (!blank_key && policy.auto_update) {
        let result = nested.save();
        scope.check(result);
    }
    nested.into_value().into_records().pop()
}

fn key_blank(descriptor: &ModelDescriptor, record: &dyn DynModel) -> bool {
    BoundFields::new(descriptor, record).primary_key_blank()
}

/// Save belongs-to records and copy their keys into the owner.
pub fn save_before_associations(scope: &mut Scope) {
    if scope.has_error() || scope.value().record().is_none() {
        return;
    }
    let Some(descriptor) = scope.descriptor().cloned() else {
        return;
    };
    for (field, relationship) in descriptor.relationships() {
        if relationship.kind != RelationshipKind::BelongsTo {
            continue;
        }
        let Some(policy) = save_policy(scope, field) else {
            continue;
        };
        let Some(related) = take_relation(scope, &field.name) else {
            continue;
        };
        let Some(record) = related.into_records().into_iter().next() else {
            continue;
        };

        let Some(record) = save_related(scope, record, policy) else {
            continue;
        };
        if policy.save_reference {
            for (foreign, association) in relationship
                .foreign_field_names
                .iter()
                .zip(&relationship.association_field_names)
            {
                let value = record.read(association).unwrap_or_default();
                let result = scope.set_column(foreign, value);
                scope.check(result);
            }
        }
        put_relation(scope, &field.name, Related::One(Some(record)));
    }
}

/// Save has-one, has-many and many-to-many records after the owner, pointing
/// their foreign keys (or join-table links) at it.
pub fn save_after_associations(scope: &mut Scope) {
    if scope.has_error() || scope.value().record().is_none() {
        return;
    }
    let Some(descriptor) = scope.descriptor().cloned() else {
        return;
    };
    for (field, relationship) in descriptor.relationships() {
        if relationship.kind == RelationshipKind::BelongsTo {
            continue;
        }
        let Some(policy) = save_policy(scope, field) else {
            continue;
        };
        let Some(related) = take_relation(scope, &field.name) else {
            continue;
        };
        let single = matches!(related, Related::One(_));
        let mut saved = Vec::with_capacity(related.len());
        for record in related.into_records() {
            if scope.has_error() {
                saved.push(record);
            } else {
                saved.extend(save_child(scope, &descriptor, relationship, record, policy));
            }
        }
        let related = if single {
            Related::One(saved.into_iter().next())
        } else {
            Related::Many(saved)
        };
        put_relation(scope, &field.name, related);
    }
}

fn save_child(
    scope: &mut Scope,
    descriptor: &ModelDescriptor,
    relationship: &Relationship,
    mut record: Box<dyn DynModel>,
    policy: SavePolicy,
) -> Option<Box<dyn DynModel>> {
    let related = scope.db().registry().describe_type(relationship.target);
    if policy.save_reference {
        let owner_keys: Vec<Value> = match scope.value().record() {
            Some(owner) => relationship
                .association_field_names
                .iter()
                .map(|name| owner.read(name).unwrap_or_default())
                .collect(),
            None => Vec::new(),
        };
        if relationship.join_table.is_none() {
            for (foreign, value) in relationship.foreign_field_names.iter().zip(owner_keys) {
                let result = set_field(&related, record.as_mut(), foreign, value);
                scope.check(result);
            }
        }
        if let Some(polymorphic) = &relationship.polymorphic {
            let result = set_field(
                &related,
                record.as_mut(),
                &polymorphic.type_field,
                Value::Text(polymorphic.value.clone()),
            );
            scope.check(result);
        }
    }

    let record = save_related(scope, record, policy)?;

    if policy.save_reference && !key_blank(&related, record.as_ref()) {
        if let Some(handler) = &relationship.join_table {
            let created = ensure_join_table(scope.db(), descriptor, relationship);
            if scope.check(created).is_some() {
                if let Some(owner) = scope.value().record() {
                    let db = scope.db();
                    let result = handler.add(&db.conn(), db.dialect(), owner, record.as_ref());
                    scope.check(result);
                }
            }
        }
    }
    Some(record)
}

#[cfg(test)]
mod tests {
    use crate::settings::{ASSOCIATION_AUTOCREATE, SAVE_ASSOCIATIONS};
    use crate::test_support::{Author, Book, Profile, Tag, mock_db, push_insert_id, push_rows, recorded};
    use sqlscope_core::Value;

    fn statements(db: &crate::Db) -> Vec<String> {
        recorded(db).into_iter().map(|(sql, _)| sql).collect()
    }

    #[test]
    fn test_create_saves_has_many_children_with_owner_key() {
        let db = mock_db();
        push_insert_id(&db, 10);
        push_insert_id(&db, 101);
        push_insert_id(&db, 102);
        let mut author = Author {
            name: "ann".into(),
            books: vec![
                Book {
                    title: "one".into(),
                    ..Book::default()
                },
                Book {
                    title: "two".into(),
                    ..Book::default()
                },
            ],
            ..Author::default()
        };
        db.create(&mut author).unwrap();
        assert_eq!(author.id, 10);
        assert_eq!(author.books[0].id, 101);
        assert_eq!(author.books[1].author_id, Some(10));

        let all = recorded(&db);
        assert_eq!(all[1].0, "INSERT INTO \"authors\" (\"name\") VALUES (?)");
        assert_eq!(
            all[2].0,
            "INSERT INTO \"books\" (\"title\",\"author_id\") VALUES (?,?)"
        );
        assert_eq!(all[2].1, vec![Value::from("one"), Value::BigInt(10)]);
        assert_eq!(all.last().map(|(sql, _)| sql.as_str()), Some("COMMIT"));
    }

    #[test]
    fn test_belongs_to_is_saved_first() {
        let db = mock_db();
        push_insert_id(&db, 4);
        push_insert_id(&db, 9);
        let mut book = Book {
            title: "t".into(),
            author: Some(Author {
                name: "writer".into(),
                ..Author::default()
            }),
            ..Book::default()
        };
        db.create(&mut book).unwrap();
        assert_eq!(book.author_id, Some(4));
        assert_eq!(book.author.as_ref().map(|a| a.id), Some(4));
        let all = statements(&db);
        assert_eq!(all[1], "INSERT INTO \"authors\" (\"name\") VALUES (?)");
        assert_eq!(all[2], "INSERT INTO \"books\" (\"title\",\"author_id\") VALUES (?,?)");
    }

    #[test]
    fn test_existing_child_is_updated_not_created() {
        let db = mock_db();
        let mut author = Author {
            id: 3,
            name: "ann".into(),
            profile: Some(Profile {
                id: 8,
                bio: "hi".into(),
                ..Profile::default()
            }),
            ..Author::default()
        };
        db.save(&mut author).unwrap();
        assert_eq!(author.profile.as_ref().and_then(|p| p.author_id), Some(3));
        let all = statements(&db);
        assert_eq!(all[1], "UPDATE \"authors\" SET \"name\" = ? WHERE \"authors\".\"id\" = ?");
        assert_eq!(
            all[2],
            "UPDATE \"profiles\" SET \"bio\" = ?, \"author_id\" = ? WHERE \"profiles\".\"id\" = ?"
        );
    }

    #[test]
    fn test_save_associations_off_skips_children() {
        let db = mock_db().set(SAVE_ASSOCIATIONS, false);
        push_insert_id(&db, 1);
        let mut author = Author {
            name: "solo".into(),
            books: vec![Book::default()],
            ..Author::default()
        };
        db.create(&mut author).unwrap();
        assert_eq!(author.books[0].id, 0);
        assert_eq!(statements(&db), vec!["BEGIN", "INSERT INTO \"authors\" (\"name\") VALUES (?)", "COMMIT"]);
    }

    #[test]
    fn test_autocreate_off_still_links_existing() {
        let db = mock_db().set(ASSOCIATION_AUTOCREATE, false);
        push_insert_id(&db, 1);
        let mut author = Author {
            name: "a".into(),
            books: vec![Book::default()],
            ..Author::default()
        };
        db.create(&mut author).unwrap();
        assert_eq!(author.books[0].id, 0);
        assert_eq!(author.books[0].author_id, Some(1));
        assert_eq!(statements(&db).len(), 3);
    }

    #[test]
    fn test_many_to_many_links_after_save() {
        let db = mock_db();
        push_insert_id(&db, 5);
        // join table already exists
        push_rows(&db, &["count"], vec![vec![Value::BigInt(1)]]);
        let mut author = Author {
            name: "a".into(),
            tags: vec![Tag {
                id: 2,
                name: "rust".into(),
            }],
            ..Author::default()
        };
        db.create(&mut author).unwrap();
        let all = recorded(&db);
        assert_eq!(all[2].0, "UPDATE \"tags\" SET \"name\" = ? WHERE \"tags\".\"id\" = ?");
        assert!(all[3].0.contains("INFORMATION_SCHEMA.TABLES"));
        assert!(all[4].0.starts_with("INSERT INTO \"author_tags\" (\"author_id\",\"tag_id\") SELECT ?,?"));
        assert_eq!(all[4].1[..2], [Value::BigInt(5), Value::BigInt(2)]);
    }

    /// Refuses to take its books back once they have been moved out.
    #[derive(Debug, Clone, Default)]
    struct SealedShelf {
        id: i64,
        books: Vec<Book>,
    }

    impl sqlscope_core::Model for SealedShelf {
        fn type_name() -> &'static str {
            "SealedShelf"
        }

        fn fields() -> Vec<sqlscope_core::FieldDef> {
            vec![
                sqlscope_core::FieldDef::column("id", sqlscope_core::SqlType::BigInt),
                sqlscope_core::FieldDef::many::<Book>("books").tag("foreignkey:author_id"),
            ]
        }

        fn get_value(&self, field: &str) -> Option<Value> {
            (field == "id").then(|| self.id.into())
        }

        fn set_value(&mut self, field: &str, value: Value) -> sqlscope_core::Result<()> {
            if field != "id" {
                return Err(sqlscope_core::Error::unaddressable("SealedShelf", field));
            }
            self.id = sqlscope_core::FromValue::from_value(value)?;
            Ok(())
        }

        fn take_relation(&mut self, field: &str) -> Option<sqlscope_core::Related> {
            (field == "books").then(|| sqlscope_core::Related::many(std::mem::take(&mut self.books)))
        }

        fn put_relation(&mut self, _field: &str, _related: sqlscope_core::Related) -> sqlscope_core::Result<()> {
            Err(sqlscope_core::Error::custom("shelf is sealed"))
        }
    }

    #[test]
    fn test_failed_restore_of_empty_relation_is_reported() {
        let db = mock_db();
        push_insert_id(&db, 3);
        let mut shelf = SealedShelf::default();
        let err = db.create(&mut shelf).unwrap_err();
        assert!(err.to_string().contains("shelf is sealed"));
        assert!(statements(&db).contains(&"ROLLBACK".to_string()));
    }
}
