use std::sync::Arc;

use pretty_assertions::assert_eq;
use table_crafter::{
    error::{Error, ValidationError},
    models::{IndexInfo, TableRef},
    schema_diff::SchemaDiffCompiler,
    view::TableView,
};

use crate::test_utils::{
    fixtures::{test_config, users_page, users_structure, users_table},
    FakeExecutor, StatementAssertions,
};

async fn open(executor: &Arc<FakeExecutor>) -> TableView {
    TableView::open(executor.clone(), users_table(), test_config()).await.unwrap()
}

fn uid_of(view: &TableView, name: &str) -> u64 {
    view.editor().columns().iter().find(|c| c.column.name == name).unwrap().uid
}

#[tokio::test]
async fn test_apply_runs_previewed_statements_and_refetches() {
    let executor = Arc::new(
        FakeExecutor::postgres().with_page(users_page()).with_structure(users_structure()).with_count(3),
    );
    let mut view = open(&executor).await;
    executor.reset_recorded();

    let uid = uid_of(&view, "name");
    view.editor_mut().update(uid, |c| c.name = "full_name".into());
    let preview = view.preview_ddl().unwrap();
    assert_eq!(preview.statements(), &[r#"ALTER TABLE "users" RENAME COLUMN "name" TO "full_name";"#.to_string()]);

    let mut renamed = users_structure();
    renamed.columns[1].name = "full_name".into();
    executor.set_structure(renamed);

    view.apply_ddl(preview.confirm()).await.unwrap();

    executor.recorded().assert_issued(r#"ALTER TABLE "users" RENAME COLUMN "name" TO "full_name";"#);
    let names: Vec<_> = view.editor().columns().iter().map(|c| c.column.name.clone()).collect();
    assert_eq!(names, vec!["id", "full_name", "email"]);
    assert!(!view.editor().has_changes());
    assert!(!view.is_saving());
}

#[tokio::test]
async fn test_failed_ddl_surfaces_engine_message_and_refetches() {
    let executor = Arc::new(
        FakeExecutor::mysql().with_page(users_page()).with_structure(users_structure()).with_count(3),
    );
    let mut view = open(&executor).await;
    executor.fail_when("ALTER TABLE", "Duplicate column name 'email'");

    let uid = uid_of(&view, "name");
    view.editor_mut().update(uid, |c| c.data_type = "text".into());
    let preview = view.preview_ddl().unwrap();

    let err = view.apply_ddl(preview.confirm()).await.unwrap_err();
    assert_eq!(err.to_string(), "Duplicate column name 'email'");
    // The editor is rebuilt from what the server reports.
    assert!(!view.editor().has_changes());
    assert!(!view.is_saving());
}

#[tokio::test]
async fn test_primary_key_change_uses_the_fetched_constraint_name() {
    // A table renamed from `accounts` keeps its original key name.
    let mut structure = users_structure();
    structure.indexes.push(IndexInfo {
        name: "accounts_pkey".into(),
        columns: vec!["id".into()],
        is_unique: true,
        is_primary: true,
    });
    let executor = Arc::new(FakeExecutor::postgres().with_page(users_page()).with_structure(structure).with_count(3));
    let mut view = open(&executor).await;

    let uid = uid_of(&view, "name");
    view.editor_mut().update(uid, |c| c.is_primary_key = true);
    let preview = view.preview_ddl().unwrap();

    assert_eq!(
        preview.statements(),
        &[r#"ALTER TABLE "users" DROP CONSTRAINT "accounts_pkey", ADD PRIMARY KEY ("id", "name");"#.to_string()]
    );
}

#[tokio::test]
async fn test_invalid_structure_blocks_preview() {
    let executor = Arc::new(FakeExecutor::postgres().with_structure(users_structure()));
    let mut view = open(&executor).await;
    let uid = uid_of(&view, "email");
    view.editor_mut().update(uid, |c| c.name = "  ".into());

    assert!(matches!(
        view.preview_ddl(),
        Err(Error::Validation(ValidationError::EmptyColumnName { position: 3 }))
    ));
}

#[tokio::test]
async fn test_ddl_for_another_table_is_rejected() {
    let executor = Arc::new(FakeExecutor::postgres().with_structure(users_structure()));
    let mut view = open(&executor).await;
    executor.reset_recorded();

    let mut editor = view.editor().clone();
    let uid = uid_of(&view, "email");
    editor.delete(uid);
    let preview = SchemaDiffCompiler::new(table_crafter::dialect::Dialect::Postgres)
        .compile(&TableRef::new("orders"), editor.columns())
        .unwrap();

    assert!(matches!(view.apply_ddl(preview.confirm()).await, Err(Error::Validation(_))));
    assert!(executor.recorded().is_empty());
}
