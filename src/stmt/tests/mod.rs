use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::entity::Entity;
use crate::key::Key;
use crate::model::codec::StructCodec;
use crate::model::{FieldDescriptor as Fd, FieldType, KEY_TAG, StructDescriptor};
use crate::query::{Direction, LockMode, Operator, Query};
use crate::stmt::dialect::Dialect;
use crate::stmt::{
    TableInfo, build_alter_table, build_create_table, build_delete, build_insert, build_select,
    build_soft_delete, build_update, build_update_map,
};
use crate::value::{Storable, Value};

fn user_desc() -> StructDescriptor {
    StructDescriptor::new(
        "User",
        vec![
            Fd::new("Key", KEY_TAG, FieldType::Key),
            Fd::new("Name", "", FieldType::Text),
            Fd::new("Age", "", FieldType::Uint8),
            Fd::new("Emails", ",flatten", FieldType::List(Box::new(FieldType::Text))),
            Fd::new("Nickname", "", FieldType::Text).optional(),
            Fd::new("DeletedAt", "", FieldType::SoftDelete),
        ],
    )
}

fn entity() -> Entity {
    Entity {
        codec: Arc::new(StructCodec::build(&user_desc()).unwrap()),
        table: "User".to_string(),
    }
}

fn user(key: Key, name: &str, age: u64, emails: &[&str]) -> Value {
    Value::Record(vec![
        ("Key".to_string(), Value::Key(key)),
        ("Name".to_string(), Value::Text(name.to_string())),
        ("Age".to_string(), Value::Uint(age)),
        (
            "Emails".to_string(),
            Value::List(emails.iter().map(|e| Value::Text(e.to_string())).collect()),
        ),
        ("Nickname".to_string(), Value::Null),
        ("DeletedAt".to_string(), Value::Null),
    ])
}

fn text(s: &str) -> Storable {
    Storable::Text(s.to_string())
}

#[test]
fn test_select_scopes_out_soft_deleted() {
    let stmt = build_select(&entity(), &Query::new(""), Dialect::MySql).unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM `User` WHERE `$Deleted` IS NULL");
    assert!(stmt.args.is_empty());
}

#[test]
fn test_select_unscoped_sees_everything() {
    let stmt = build_select(&entity(), &Query::new("").unscoped(), Dialect::MySql).unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM `User`");
}

#[test]
fn test_select_filters() {
    let q = Query::new("").filter("Age", ">=", 21i64).filter("Name", "like", "jo%");
    let stmt = build_select(&entity(), &q, Dialect::MySql).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM `User` WHERE `Age` >= ? AND `Name` LIKE ? AND `$Deleted` IS NULL"
    );
    assert_eq!(stmt.args, vec![Storable::Int(21), text("jo%")]);
}

#[test]
fn test_nil_equality_renders_is_null() {
    let q = Query::new("").filter_op("Nickname", Operator::Eq, Value::Null);
    let stmt = build_select(&entity(), &q, Dialect::MySql).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM `User` WHERE `Nickname` IS NULL AND `$Deleted` IS NULL"
    );
    assert!(stmt.args.is_empty());
}

#[test]
fn test_unknown_filter_column_rejected() {
    let q = Query::new("").filter("Nope", "=", 1i64);
    assert!(build_select(&entity(), &q, Dialect::MySql).is_err());
}

#[test]
fn test_empty_in_set_rejected() {
    let q = Query::new("").filter_op("Age", Operator::In, Value::List(Vec::new()));
    assert!(build_select(&entity(), &q, Dialect::MySql).is_err());
}

#[test]
fn test_ancestor_clause_matches_subtree() {
    let q = Query::new("").ancestor(Key::with_int("Account", 7));
    let stmt = build_select(&entity(), &q, Dialect::MySql).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM `User` WHERE (`$Parent` = ? OR `$Parent` LIKE ?) AND `$Deleted` IS NULL"
    );
    assert_eq!(stmt.args, vec![text("Account,7"), text("Account,7/%")]);
}

#[test]
fn test_ancestor_of_same_kind_includes_itself() {
    let q = Query::new("").ancestor(Key::with_int("User", 1));
    let stmt = build_select(&entity(), &q, Dialect::MySql).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM `User` WHERE ((`$Parent` = ? AND `$Key` = ?) OR `$Parent` = ? OR \
         `$Parent` LIKE ?) AND `$Deleted` IS NULL"
    );
    // Anchored on the separator: never matches the sibling `User,10`.
    assert_eq!(
        stmt.args,
        vec![text(""), text("1"), text("User,1"), text("User,1/%")]
    );
}

#[test]
fn test_identity_order_uses_concatenated_key() {
    let q = Query::new("").order_by(KEY_TAG, Direction::Desc);
    let stmt = build_select(&entity(), &q, Dialect::MySql).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM `User` WHERE `$Deleted` IS NULL \
         ORDER BY CONCAT(`$Parent`, '/User,', `$Key`) DESC"
    );
}

#[test]
fn test_identity_range_filter() {
    let q = Query::new("").filter_op(
        KEY_TAG,
        Operator::Gt,
        Value::Key(Key::with_int("User", 5)),
    );
    let stmt = build_select(&entity(), &q, Dialect::MySql).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM `User` WHERE CONCAT(`$Parent`, '/User,', `$Key`) > ? \
         AND `$Deleted` IS NULL"
    );
    assert_eq!(stmt.args, vec![text("/User,5")]);
}

#[test]
fn test_identity_filter_rejects_foreign_kind() {
    // Account,5 must not compile down to the same predicate as User,5.
    let q = Query::new("").where_key(Operator::Eq, Key::with_int("Account", 5));
    assert!(build_select(&entity(), &q, Dialect::MySql).is_err());

    let q = Query::new("").where_key(Operator::Gt, Key::with_int("Account", 5));
    assert!(build_select(&entity(), &q, Dialect::MySql).is_err());

    let q = Query::new("").filter_op(
        KEY_TAG,
        Operator::In,
        Value::List(vec![Value::Key(Key::with_int("Account", 5))]),
    );
    assert!(build_select(&entity(), &q, Dialect::MySql).is_err());
}

#[test]
fn test_postgres_placeholders_and_quoting() {
    let q = Query::new("").filter("Age", ">=", 21i64);
    let stmt = build_select(&entity(), &q, Dialect::Postgres).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM \"User\" WHERE \"Age\" >= $1 AND \"$Deleted\" IS NULL"
    );
}

#[test]
fn test_projection_expands_identity() {
    let q = Query::new("").select(&["Name", KEY_TAG]);
    let stmt = build_select(&entity(), &q, Dialect::MySql).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT `Name`, `$Key`, `$Parent` FROM `User` WHERE `$Deleted` IS NULL"
    );
}

#[test]
fn test_omit_drops_declared_columns() {
    let q = Query::new("").omit(&["Age"]);
    let stmt = build_select(&entity(), &q, Dialect::MySql).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT `$Key`, `$Parent`, `Name`, `Emails[0]`, `Nickname`, `$Deleted` \
         FROM `User` WHERE `$Deleted` IS NULL"
    );
}

#[test]
fn test_limit_offset_lock() {
    let q = Query::new("").limit(10).offset(5).lock(LockMode::ForUpdate);
    let stmt = build_select(&entity(), &q, Dialect::MySql).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM `User` WHERE `$Deleted` IS NULL LIMIT 10 OFFSET 5 FOR UPDATE"
    );
}

#[test]
fn test_insert_single_row() {
    let record = user(Key::with_int("User", 66), "Jack", 30, &["jack@a", "jack@b"]);
    let (stmt, keys) = build_insert(&entity(), &[record], Dialect::MySql).unwrap();
    assert_eq!(
        stmt.sql,
        "INSERT INTO `User` (`$Key`, `$Parent`, `Name`, `Age`, `Emails[0]`, `Emails[1]`, \
         `Nickname`, `$Deleted`) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    );
    assert_eq!(
        stmt.args,
        vec![
            text("66"),
            text(""),
            text("Jack"),
            Storable::Uint(30),
            text("jack@a"),
            text("jack@b"),
            Storable::Null,
            Storable::Null,
        ]
    );
    assert_eq!(keys, vec![Key::with_int("User", 66)]);
}

#[test]
fn test_insert_generates_missing_ids() {
    let record = user(Key::incomplete("User"), "Jill", 28, &[]);
    let (stmt, keys) = build_insert(&entity(), &[record], Dialect::MySql).unwrap();
    assert!(keys[0].is_complete());
    assert_eq!(stmt.args[0], text(&keys[0].id().literal()));
}

#[test]
fn test_insert_unions_columns_across_rows() {
    let wide = user(Key::with_int("User", 1), "A", 1, &["a@x", "a@y"]);
    let narrow = user(Key::with_int("User", 2), "B", 2, &["b@x"]);
    let (stmt, _) = build_insert(&entity(), &[wide, narrow], Dialect::MySql).unwrap();
    assert!(stmt.sql.contains("`Emails[1]`"));
    assert_eq!(stmt.args.len(), 16);
    // The narrow row pads the union column with NULL.
    assert_eq!(stmt.args[13], Storable::Null);
}

#[test]
fn test_insert_rejects_kind_mismatch() {
    let record = user(Key::with_int("Account", 1), "A", 1, &[]);
    assert!(build_insert(&entity(), &[record], Dialect::MySql).is_err());
}

#[test]
fn test_update_addresses_record_key_and_honors_omits() {
    let record = user(Key::with_int("User", 66), "Jack", 31, &["jack@a", "jack@b"]);
    let stmt = build_update(&entity(), &record, &["Age".to_string()], Dialect::MySql).unwrap();
    assert_eq!(
        stmt.sql,
        "UPDATE `User` SET `Name` = ?, `Emails[0]` = ?, `Emails[1]` = ?, `Nickname` = ?, \
         `$Deleted` = ? WHERE `$Parent` = ? AND `$Key` = ?"
    );
    assert_eq!(stmt.args[5], text(""));
    assert_eq!(stmt.args[6], text("66"));
}

#[test]
fn test_update_requires_complete_key() {
    let record = user(Key::incomplete("User"), "Jack", 31, &[]);
    assert!(build_update(&entity(), &record, &[], Dialect::MySql).is_err());
}

#[test]
fn test_update_map_orders_columns_deterministically() {
    let changes: HashMap<String, Value> = HashMap::from([
        ("Name".to_string(), Value::Text("new".to_string())),
        ("Age".to_string(), Value::Uint(40)),
    ]);
    let stmt =
        build_update_map(&entity(), &Key::with_int("User", 3), &changes, Dialect::MySql).unwrap();
    assert_eq!(
        stmt.sql,
        "UPDATE `User` SET `Age` = ?, `Name` = ? WHERE `$Parent` = ? AND `$Key` = ?"
    );
    assert_eq!(
        stmt.args,
        vec![Storable::Uint(40), text("new"), text(""), text("3")]
    );
}

#[test]
fn test_update_map_refuses_reserved_columns() {
    for reserved in ["$Key", "$Parent", "$Deleted", KEY_TAG] {
        let changes = HashMap::from([(reserved.to_string(), Value::Int(1))]);
        assert!(
            build_update_map(&entity(), &Key::with_int("User", 3), &changes, Dialect::MySql)
                .is_err()
        );
    }
}

#[test]
fn test_delete_by_key_membership() {
    let keys = vec![
        Key::with_int("User", 1),
        Key::with_name("User", "jack")
            .unwrap()
            .with_parent(Key::with_int("Account", 7)),
    ];
    let stmt = build_delete(&entity(), &keys, Dialect::MySql).unwrap();
    assert_eq!(
        stmt.sql,
        "DELETE FROM `User` WHERE CONCAT(`$Parent`, '/User,', `$Key`) IN (?, ?)"
    );
    assert_eq!(stmt.args, vec![text("/User,1"), text("Account,7/User,'jack'")]);
}

#[test]
fn test_delete_rejects_foreign_kind() {
    let keys = vec![Key::with_int("Account", 1)];
    assert!(build_delete(&entity(), &keys, Dialect::MySql).is_err());
}

#[test]
fn test_soft_delete_stamps_marker() {
    let at = chrono::NaiveDate::from_ymd_opt(2020, 1, 2)
        .unwrap()
        .and_hms_opt(3, 4, 5)
        .unwrap();
    let stmt =
        build_soft_delete(&entity(), &[Key::with_int("User", 9)], at, Dialect::MySql).unwrap();
    assert_eq!(
        stmt.sql,
        "UPDATE `User` SET `$Deleted` = ? WHERE CONCAT(`$Parent`, '/User,', `$Key`) IN (?)"
    );
    assert_eq!(stmt.args, vec![text("2020-01-02 03:04:05"), text("/User,9")]);
}

#[test]
fn test_create_table_mysql() {
    let statements = build_create_table(&entity(), Dialect::MySql).unwrap();
    assert_eq!(
        statements[0].sql,
        "CREATE TABLE `User` (\n\
         \x20 `$Key` VARCHAR(191) NOT NULL,\n\
         \x20 `$Parent` VARCHAR(767) NOT NULL,\n\
         \x20 `Name` VARCHAR(191) NOT NULL,\n\
         \x20 `Age` TINYINT UNSIGNED NOT NULL,\n\
         \x20 `Emails[0]` VARCHAR(191),\n\
         \x20 `Nickname` VARCHAR(191),\n\
         \x20 `$Deleted` DATETIME,\n\
         \x20 PRIMARY KEY (`$Parent`, `$Key`)\n\
         )"
    );
    let indexes: Vec<&str> = statements[1..].iter().map(|s| s.sql.as_str()).collect();
    assert_eq!(indexes[0], "CREATE INDEX `ix_User_Name` ON `User` (`Name`)");
    assert_eq!(indexes.len(), 5);
    assert!(indexes.iter().any(|s| s.contains("ix_User_Emails_0_")));
}

#[test]
fn test_alter_table_is_additive() {
    let info = TableInfo {
        columns: HashSet::from([
            "$Key".to_string(),
            "$Parent".to_string(),
            "Name".to_string(),
            "Age".to_string(),
            "Obsolete".to_string(),
        ]),
        indexes: HashSet::from(["ix_User_Name".to_string(), "ix_User_Old".to_string()]),
    };
    let statements = build_alter_table(&entity(), &info, Dialect::MySql).unwrap();
    let alter = &statements[0].sql;
    assert!(alter.starts_with("ALTER TABLE `User` "));
    assert!(alter.contains("MODIFY COLUMN `Name` VARCHAR(191) NOT NULL"));
    assert!(alter.contains("ADD COLUMN `Emails[0]` VARCHAR(191)"));
    assert!(alter.contains("ADD COLUMN `$Deleted` DATETIME"));
    // Existing data is never destroyed by migration.
    assert!(!alter.contains("DROP COLUMN"));
    assert!(
        statements
            .iter()
            .any(|s| s.sql == "ALTER TABLE `User` DROP INDEX `ix_User_Old`")
    );
}

#[test]
fn test_alter_table_postgres_retypes_in_place() {
    let info = TableInfo {
        columns: HashSet::from(["$Key".to_string(), "Name".to_string()]),
        indexes: HashSet::new(),
    };
    let statements = build_alter_table(&entity(), &info, Dialect::Postgres).unwrap();
    assert!(statements[0].sql.contains("ALTER COLUMN \"Name\" TYPE VARCHAR(191)"));
}
