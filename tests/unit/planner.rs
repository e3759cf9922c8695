use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;
use table_crafter::{
    dialect::Dialect,
    filter::{FilterOperator, FilterTranslator, TableFilter, WhereBuilder, WhereClause},
    planner::{PageRequest, QueryPlanner},
};

#[rstest]
#[case(Dialect::Postgres, "a\"b", "\"a\"\"b\"")]
#[case(Dialect::MySql, "a`b", "`a``b`")]
#[case(Dialect::Postgres, "plain", "\"plain\"")]
#[case(Dialect::MySql, "we`ird`", "`we``ird```")]
fn test_identifier_quoting(#[case] dialect: Dialect, #[case] name: &str, #[case] expected: &str) {
    assert_eq!(dialect.quote_identifier(name), expected);
}

#[test]
fn test_default_page_query_shape() {
    let mut request = PageRequest::new("users", None, 200);
    request.primary_key_columns = vec!["id".to_string()];

    let query = QueryPlanner::new(Dialect::Postgres, &FilterTranslator).build_data_query(&request).unwrap();

    assert_eq!(query.sql, r#"SELECT * FROM "users" ORDER BY "id" ASC LIMIT $1 OFFSET $2"#);
    assert_eq!(query.params, vec![json!(200), json!(0)]);
}

#[test]
fn test_page_zero_reads_first_page() {
    let mut request = PageRequest::new("users", None, 25);
    request.page = 0;
    let query = QueryPlanner::new(Dialect::MySql, &FilterTranslator).build_data_query(&request).unwrap();
    assert_eq!(query.params, vec![json!(25), json!(0)]);
}

#[test]
fn test_limit_placeholders_continue_after_filter_params() {
    let mut request = PageRequest::new("users", Some("crm".into()), 10);
    request.page = 2;
    request.filters = vec![
        TableFilter::new("name", FilterOperator::StartsWith, "Al"),
        TableFilter::new("id", FilterOperator::GreaterThan, "5"),
        TableFilter::new("email", FilterOperator::Equals, "ignored").disabled(),
    ];

    let query = QueryPlanner::new(Dialect::Postgres, &FilterTranslator).build_data_query(&request).unwrap();

    assert_eq!(
        query.sql,
        r#"SELECT * FROM "crm"."users" WHERE "name"::text LIKE $1 AND "id" > $2 LIMIT $3 OFFSET $4"#
    );
    assert_eq!(query.params, vec![json!("Al%"), json!(5), json!(10), json!(10)]);
}

/// Planner output depends only on what the builder returns.
struct FixedWhere;

impl WhereBuilder for FixedWhere {
    fn build_where_clause(&self, _filters: &[TableFilter], dialect: Dialect, first_placeholder: usize) -> WhereClause {
        WhereClause {
            sql: format!("tenant_id = {}", dialect.placeholder(first_placeholder)),
            params: vec![json!(7)],
        }
    }
}

#[test]
fn test_custom_where_builder_is_used_verbatim() {
    let request = PageRequest::new("users", None, 5);
    let planner = QueryPlanner::new(Dialect::Postgres, &FixedWhere);

    let data = planner.build_data_query(&request).unwrap();
    assert_eq!(data.sql, r#"SELECT * FROM "users" WHERE tenant_id = $1 LIMIT $2 OFFSET $3"#);
    assert_eq!(data.params, vec![json!(7), json!(5), json!(0)]);

    let count = planner.build_count_query("users", None, &[]);
    assert_eq!(count.sql, r#"SELECT COUNT(*) AS count FROM "users" WHERE tenant_id = $1"#);
    assert_eq!(count.params, vec![json!(7)]);
}
