use serde_json::{json, Value};
use table_crafter::{
    config::Config,
    models::{Field, QueryResult, TableRef, TableStructure},
    structure::SchemaColumn,
};

pub fn users_table() -> TableRef {
    TableRef::new("users")
}

pub fn user_fields() -> Vec<Field> {
    vec![
        Field { name: "id".into(), data_type: "INT8".into() },
        Field { name: "name".into(), data_type: "TEXT".into() },
        Field { name: "email".into(), data_type: "TEXT".into() },
    ]
}

pub fn user_rows() -> Vec<Vec<Value>> {
    vec![
        vec![json!(1), json!("Alice Johnson"), json!("alice@example.com")],
        vec![json!(2), json!("Bob Smith"), json!("bob@example.com")],
        vec![json!(3), json!("Charlie Brown"), Value::Null],
    ]
}

pub fn users_page() -> QueryResult {
    let rows = user_rows();
    QueryResult { row_count: rows.len() as u64, rows, fields: user_fields(), execution_time_ms: 2 }
}

pub fn user_columns() -> Vec<SchemaColumn> {
    let mut id = SchemaColumn::new("id", "bigint");
    id.nullable = false;
    id.is_primary_key = true;
    id.is_auto_increment = true;
    id.column_key = "PRI".into();
    id.ordinal_position = 1;

    let mut name = SchemaColumn::new("name", "varchar(255)");
    name.nullable = false;
    name.ordinal_position = 2;

    let mut email = SchemaColumn::new("email", "varchar(255)");
    email.ordinal_position = 3;

    vec![id, name, email]
}

pub fn users_structure() -> TableStructure {
    TableStructure { columns: user_columns(), ..Default::default() }
}

/// Same columns without a primary key.
pub fn keyless_structure() -> TableStructure {
    let columns = user_columns()
        .into_iter()
        .map(|mut c| {
            c.is_primary_key = false;
            c.is_auto_increment = false;
            c.column_key.clear();
            c
        })
        .collect();
    TableStructure { columns, ..Default::default() }
}

pub fn test_config() -> Config {
    Config { page_size: 2, ..Config::default() }
}
