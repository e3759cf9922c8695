use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use table_crafter::{
    dialect::Dialect,
    ledger::{RowIdentity, StagedChange},
    models::TableRef,
    transaction::TransactionCompiler,
};

fn by_id(id: i64) -> RowIdentity {
    RowIdentity { values: vec![("id".into(), json!(id))], full_row: false }
}

fn order_types() -> Vec<(&'static str, &'static str)> {
    vec![
        ("id", "uuid"),
        ("qty", "integer"),
        ("note", "character varying(40)"),
        ("placed_at", "timestamp without time zone"),
        ("meta", "json"),
    ]
}

#[test]
fn test_mysql_insert_skips_null_auto_increment() {
    let change = StagedChange::insert(TableRef::new("t"), vec![("a".into(), Value::Null), ("b".into(), json!("x"))]);
    let compiler = TransactionCompiler::new(Dialect::MySql).with_auto_increment(["a"]);

    let compiled = compiler.compile(&[change]).unwrap();

    assert_eq!(compiled.len(), 1);
    assert_eq!(compiled[0].sql, "INSERT INTO `t` (`b`) VALUES (?)");
    assert_eq!(compiled[0].params, vec![json!("x")]);
}

#[test]
fn test_explicit_auto_increment_value_is_kept() {
    let change = StagedChange::insert(TableRef::new("t"), vec![("a".into(), json!(10)), ("b".into(), json!("x"))]);
    let compiler = TransactionCompiler::new(Dialect::Postgres).with_auto_increment(["a"]);

    let compiled = compiler.compile(&[change]).unwrap();

    assert_eq!(compiled[0].sql, r#"INSERT INTO "t" ("a", "b") VALUES ($1, $2)"#);
    assert_eq!(compiled[0].params, vec![json!(10), json!("x")]);
}

#[test]
fn test_delete_is_limited_on_mysql_only() {
    let table = TableRef::with_schema("users", "crm");
    let change = StagedChange::delete(table, 0, vec![], by_id(3));

    let mysql = TransactionCompiler::new(Dialect::MySql).compile(&[change.clone()]).unwrap();
    assert_eq!(mysql[0].sql, "DELETE FROM `crm`.`users` WHERE `id` = ? LIMIT 1");

    let postgres = TransactionCompiler::new(Dialect::Postgres).compile(&[change]).unwrap();
    assert_eq!(postgres[0].sql, r#"DELETE FROM "crm"."users" WHERE "id" = $1"#);
    assert_eq!(postgres[0].params, vec![json!(3)]);
}

#[test]
fn test_failed_change_names_column_and_operation() {
    let change = StagedChange::update(TableRef::new("users"), 0, "email", json!("a"), json!("b"), by_id(1));
    let compiled = TransactionCompiler::new(Dialect::Postgres).compile(&[change]).unwrap();
    assert_eq!(compiled[0].source.to_string(), "update on users.email");
}

#[test]
fn test_empty_snapshot_compiles_to_nothing() {
    assert!(TransactionCompiler::new(Dialect::MySql).compile(&[]).unwrap().is_empty());
}

#[test]
fn test_postgres_placeholders_are_cast_to_column_types() {
    let order_id = json!("6f1c7a52-3c55-4d7e-9f0a-5b1d2e3f4a5b");
    let identity = RowIdentity { values: vec![("id".into(), order_id.clone())], full_row: false };
    let change = StagedChange::update(TableRef::new("orders"), 0, "qty", json!(3), json!("5"), identity);
    let compiler = TransactionCompiler::new(Dialect::Postgres).with_column_types(order_types());

    let compiled = compiler.compile(&[change]).unwrap();

    assert_eq!(
        compiled[0].sql,
        r#"UPDATE "orders" SET "qty" = CAST($1 AS integer) WHERE "id" = CAST($2 AS uuid)"#
    );
    assert_eq!(compiled[0].params, vec![json!("5"), order_id]);
}

#[test]
fn test_textual_columns_stay_uncast() {
    let change = StagedChange::update(TableRef::new("orders"), 0, "note", json!("a"), json!("b"), by_id(1));
    let compiler = TransactionCompiler::new(Dialect::Postgres).with_column_types([("note", "character varying(40)")]);

    let compiled = compiler.compile(&[change]).unwrap();

    assert_eq!(compiled[0].sql, r#"UPDATE "orders" SET "note" = $1 WHERE "id" = $2"#);
}

#[test]
fn test_full_row_identity_casts_each_column() {
    let identity = RowIdentity {
        values: vec![
            ("placed_at".into(), json!("2024-03-01T10:00:00")),
            ("note".into(), json!("rush")),
            ("meta".into(), json!({"gift": true})),
            ("qty".into(), Value::Null),
        ],
        full_row: true,
    };
    let change = StagedChange::delete(TableRef::new("orders"), 0, vec![], identity);
    let compiler = TransactionCompiler::new(Dialect::Postgres).with_column_types(order_types());

    let compiled = compiler.compile(&[change]).unwrap();

    assert_eq!(
        compiled[0].sql,
        concat!(
            r#"DELETE FROM "orders" WHERE "placed_at" = CAST($1 AS timestamp without time zone)"#,
            r#" AND "note" = $2 AND CAST("meta" AS jsonb) = CAST($3 AS jsonb) AND "qty" IS NULL"#,
        )
    );
}

#[test]
fn test_postgres_insert_casts_values() {
    let row = vec![("qty".into(), json!("2")), ("note".into(), json!("x"))];
    let change = StagedChange::insert(TableRef::new("orders"), row);
    let compiler = TransactionCompiler::new(Dialect::Postgres).with_column_types(order_types());

    let compiled = compiler.compile(&[change]).unwrap();

    assert_eq!(compiled[0].sql, r#"INSERT INTO "orders" ("qty", "note") VALUES (CAST($1 AS integer), $2)"#);
}

#[test]
fn test_mysql_ignores_column_types() {
    let change = StagedChange::update(TableRef::new("orders"), 0, "qty", json!(3), json!("5"), by_id(1));
    let compiler = TransactionCompiler::new(Dialect::MySql).with_column_types(order_types());

    let compiled = compiler.compile(&[change]).unwrap();

    assert_eq!(compiled[0].sql, "UPDATE `orders` SET `qty` = ? WHERE `id` = ? LIMIT 1");
}
