#![cfg(feature = "sqlite")]

mod common;

use common::{User, setup, setup_with};
use sqlscope::prelude::*;

fn seed(db: &Db) -> Vec<User> {
    [("ann", 31), ("bob", 19), ("cy", 45)]
        .into_iter()
        .map(|(name, age)| {
            let mut user = User::named(name, age);
            db.create(&mut user).expect("create user");
            user
        })
        .collect()
}

#[test]
fn sqlite_create_assigns_key_and_timestamps() {
    let db = setup();
    let mut ann = User::named("ann", 31);
    db.create(&mut ann).expect("create ann");
    assert_eq!(ann.id, 1);
    assert!(ann.created_at.is_some());
    assert!(ann.updated_at.is_some());

    let mut bob = User::named("bob", 19);
    db.create(&mut bob).expect("create bob");
    assert_eq!(bob.id, 2);

    let loaded: User = db.first().expect("first user");
    assert_eq!(loaded.name, "ann");
    assert_eq!(loaded.age, Some(31));
    assert!(loaded.active);
    assert!(loaded.found, "after_find runs on loaded records");
    assert!(loaded.created_at.is_some());
}

#[test]
fn sqlite_filter_order_and_limit() {
    let db = setup();
    seed(&db);

    let adults: Vec<User> = db
        .filter("age > ?", args![20])
        .order("age desc")
        .find()
        .expect("find adults");
    let names: Vec<&str> = adults.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, ["cy", "ann"]);

    let youngest: Vec<User> = db.order("age").limit(1).find().expect("find youngest");
    assert_eq!(youngest.len(), 1);
    assert_eq!(youngest[0].name, "bob");

    let skipped: Vec<User> = db.order("id").limit(10).offset(2).find().expect("offset");
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].name, "cy");
}

#[test]
fn sqlite_primary_key_and_map_conditions() {
    let db = setup();
    let users = seed(&db);

    let picked: Vec<User> = db
        .filter(vec![users[0].id, users[2].id], args![])
        .order("id")
        .find()
        .expect("find by keys");
    let names: Vec<&str> = picked.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, ["ann", "cy"]);

    let bob: User = db
        .filter(Condition::map([("name", "bob")]), args![])
        .first()
        .expect("find by map");
    assert_eq!(bob.age, Some(19));

    let not_bob: Vec<User> = db.not("name = ?", args!["bob"]).find().expect("not");
    assert_eq!(not_bob.len(), 2);

    let either: Vec<User> = db
        .filter("name = ?", args!["ann"])
        .or("name = ?", args!["cy"])
        .find()
        .expect("or");
    assert_eq!(either.len(), 2);
}

#[test]
fn sqlite_first_and_last_follow_primary_key() {
    let db = setup();
    seed(&db);
    let first: User = db.first().expect("first");
    let last: User = db.last().expect("last");
    assert_eq!(first.name, "ann");
    assert_eq!(last.name, "cy");
}

#[test]
fn sqlite_missing_record_is_not_found() {
    let db = setup();
    seed(&db);
    let err = db
        .filter("name = ?", args!["nobody"])
        .first::<User>()
        .expect_err("no such user");
    assert!(err.is_record_not_found());

    let none: Vec<User> = db.filter("name = ?", args!["nobody"]).find().expect("find");
    assert!(none.is_empty(), "finding many never reports not found");
}

#[test]
fn sqlite_update_attrs_and_save() {
    let db = setup();
    let mut user = seed(&db).remove(0);
    let before: User = db.filter(user.id, args![]).first().expect("load");

    let rows = db
        .update_attrs(&mut user, [("name", "anna")])
        .expect("update attrs");
    assert_eq!(rows, 1);
    assert_eq!(user.name, "anna");

    let unchanged = db
        .update_attrs(&mut user, [("name", "anna")])
        .expect("noop update");
    assert_eq!(unchanged, 0);

    user.age = Some(32);
    db.save(&mut user).expect("save");
    let reloaded: User = db.filter(user.id, args![]).first().expect("reload");
    assert_eq!(reloaded.name, "anna");
    assert_eq!(reloaded.age, Some(32));
    assert_eq!(reloaded.created_at, before.created_at);
}

#[test]
fn sqlite_update_columns_bypasses_hooks() {
    let db = setup();
    let mut user = seed(&db).remove(0);
    let before: User = db.filter(user.id, args![]).first().expect("load");

    // before_save would reject a blank name
    db.update_columns(&mut user, [("name", "")]).expect("update columns");
    let reloaded: User = db.filter(user.id, args![]).first().expect("reload");
    assert_eq!(reloaded.name, "");
    assert_eq!(reloaded.updated_at, before.updated_at);
}

#[test]
fn sqlite_update_all_matching_rows() {
    let db = setup();
    seed(&db);
    let rows = db
        .filter("age > ?", args![20])
        .update_all::<User, _, _>([("active", false)])
        .expect("update all");
    assert_eq!(rows, 2);
    let active = db.filter("active = ?", args![true]).count::<User>().expect("count");
    assert_eq!(active, 1);
}

#[test]
fn sqlite_count_and_pluck() {
    let db = setup();
    seed(&db);
    assert_eq!(db.count::<User>().expect("count"), 3);
    assert_eq!(
        db.filter("age < ?", args![40]).count::<User>().expect("count"),
        2
    );
    let names: Vec<String> = db.order("name desc").pluck::<User, _>("name").expect("pluck");
    assert_eq!(names, ["cy", "bob", "ann"]);
}

#[test]
fn sqlite_soft_delete_and_unscoped() {
    let db = setup();
    let users = seed(&db);

    let rows = db.delete(&users[1]).expect("soft delete");
    assert_eq!(rows, 1);

    let visible: Vec<User> = db.find().expect("find");
    assert_eq!(visible.len(), 2);
    assert!(visible.iter().all(|u| u.name != "bob"));
    assert_eq!(db.count::<User>().expect("count"), 2);

    let everyone: Vec<User> = db.unscoped().order("id").find().expect("unscoped find");
    assert_eq!(everyone.len(), 3);
    assert!(everyone[1].deleted_at.is_some());

    db.unscoped().delete(&users[1]).expect("hard delete");
    assert_eq!(db.unscoped().count::<User>().expect("count"), 2);
}

#[test]
fn sqlite_delete_without_conditions_can_be_blocked() {
    let db = setup_with(DbConfig::default().blocking_delete_without_conditions(true));
    seed(&db);
    let err = db.delete_all::<User>().expect_err("blocked");
    assert!(err.to_string().contains("no conditions"));
    assert_eq!(
        db.filter("age < ?", args![20]).delete_all::<User>().expect("scoped delete"),
        1
    );
}

#[test]
fn sqlite_first_or_create_is_idempotent() {
    let db = setup();
    let query = db.filter(Condition::map([("name", "dee")]), args![]).attrs([("age", 50_i64)]);

    let created = query.first_or_create::<User>().expect("create dee");
    assert!(created.id > 0);
    assert_eq!(created.age, Some(50));

    let again = query.first_or_create::<User>().expect("find dee");
    assert_eq!(again.id, created.id);
    assert_eq!(db.count::<User>().expect("count"), 1);

    let initialized = db
        .filter(Condition::map([("name", "eve")]), args![])
        .first_or_init::<User>()
        .expect("init eve");
    assert_eq!(initialized.id, 0);
    assert_eq!(initialized.name, "eve");
    assert_eq!(db.count::<User>().expect("count"), 1);
}

#[test]
fn sqlite_raw_rows_and_exec() {
    let db = setup();
    seed(&db);
    let changed = db
        .exec("UPDATE users SET age = age + ? WHERE name IN (?)", args![1, vec!["ann", "bob"]])
        .expect("exec");
    assert_eq!(changed, 2);

    let rows = db
        .raw_rows("SELECT name, age FROM users WHERE age > ? ORDER BY age", args![20])
        .expect("raw rows");
    let ages: Vec<i64> = rows
        .iter()
        .map(|row| i64::from_value(row.get_named("age").cloned().unwrap_or_default()).unwrap())
        .collect();
    assert_eq!(ages, [32, 45]);
}

#[test]
fn sqlite_select_and_omit_limit_columns() {
    let db = setup();
    seed(&db);
    let partial: Vec<User> = db
        .select("name", args![])
        .order("id")
        .find()
        .expect("select name");
    assert_eq!(partial[0].name, "ann");
    assert_eq!(partial[0].age, None);
    assert_eq!(partial[0].id, 0);
}
