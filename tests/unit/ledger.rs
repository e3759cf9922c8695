use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use table_crafter::{
    ledger::{ChangeKind, ChangeLedger, EditOutcome, RowIdentity, StagedChange},
    models::TableRef,
};

use crate::test_utils::fixtures::users_table;

fn by_id(id: i64) -> RowIdentity {
    RowIdentity { values: vec![("id".into(), json!(id))], full_row: false }
}

#[test]
fn test_upsert_is_idempotent() {
    let mut ledger = ChangeLedger::new();
    let change = StagedChange::update(users_table(), 0, "name", json!("a"), json!("b"), by_id(1));

    ledger.upsert(change.clone());
    ledger.upsert(change.clone());

    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.get(&change.id), Some(&change));
}

#[test]
fn test_upsert_keeps_first_staged_position() {
    let mut ledger = ChangeLedger::new();
    let first = StagedChange::update(users_table(), 0, "name", json!("a"), json!("b"), by_id(1));
    let second = StagedChange::update(users_table(), 1, "name", json!("c"), json!("d"), by_id(2));
    ledger.upsert(first.clone());
    ledger.upsert(second.clone());

    let replaced = StagedChange::update(users_table(), 0, "name", json!("a"), json!("z"), by_id(1));
    ledger.upsert(replaced.clone());

    let listed: Vec<_> = ledger.list_for(&users_table()).into_iter().cloned().collect();
    assert_eq!(listed, vec![replaced, second]);
}

#[test]
fn test_editing_back_to_the_original_removes_the_change() {
    let mut ledger = ChangeLedger::new();
    let table = users_table();

    let outcome = ledger.stage_cell_edit(&table, 0, "name", json!("Alice"), json!("Alicia"), by_id(1));
    assert_eq!(outcome, EditOutcome::Staged);

    // The grid now shows "Alicia"; the captured original stays "Alice".
    let outcome = ledger.stage_cell_edit(&table, 0, "name", json!("Alicia"), json!("Ally"), by_id(1));
    assert_eq!(outcome, EditOutcome::Staged);
    let change = ledger.cell_change(&table, 0, "name").unwrap();
    assert_eq!((change.old.clone(), change.new.clone()), (json!("Alice"), json!("Ally")));

    let outcome = ledger.stage_cell_edit(&table, 0, "name", json!("Ally"), json!("Alice"), by_id(1));
    assert_eq!(outcome, EditOutcome::Reverted);
    assert!(ledger.is_empty());
}

#[test]
fn test_revert_compares_string_forms() {
    let mut ledger = ChangeLedger::new();
    let table = users_table();

    ledger.stage_cell_edit(&table, 0, "age", json!(30), json!("31"), by_id(1));
    let outcome = ledger.stage_cell_edit(&table, 0, "age", json!("31"), json!("30"), by_id(1));

    assert_eq!(outcome, EditOutcome::Reverted);
    assert!(ledger.is_empty());
}

#[test]
fn test_delete_supersedes_cell_edits() {
    let mut ledger = ChangeLedger::new();
    let table = users_table();
    ledger.stage_cell_edit(&table, 1, "name", json!("Bob"), json!("Robert"), by_id(2));
    ledger.stage_cell_edit(&table, 2, "name", json!("Charlie"), json!("Chuck"), by_id(3));

    assert!(ledger.stage_row_delete(&table, 1, vec![("id".into(), json!(2))], by_id(2)));

    assert!(!ledger.is_cell_edited(&table, 1, "name"));
    assert!(ledger.is_cell_edited(&table, 2, "name"));
    assert!(ledger.is_row_deleted(&table, 1));
    assert_eq!(ledger.len(), 2);
}

#[test]
fn test_second_delete_of_same_row_is_a_noop() {
    let mut ledger = ChangeLedger::new();
    let table = users_table();
    assert!(ledger.stage_row_delete(&table, 0, vec![], by_id(1)));
    assert!(!ledger.stage_row_delete(&table, 0, vec![], by_id(1)));
    assert_eq!(ledger.len(), 1);

    let outcome = ledger.stage_cell_edit(&table, 0, "name", json!("a"), json!("b"), by_id(1));
    assert_eq!(outcome, EditOutcome::RowDeleted);
    assert_eq!(ledger.len(), 1);
}

#[test]
fn test_inserts_get_distinct_ids() {
    let mut ledger = ChangeLedger::new();
    let table = users_table();
    let a = ledger.stage_insert(&table, vec![("name".into(), Value::Null)]);
    let b = ledger.stage_insert(&table, vec![("name".into(), Value::Null)]);
    assert_ne!(a, b);

    assert!(ledger.update_insert_cell(&a, "name", json!("Dana")));
    let rows: Vec<_> = ledger.inserted_rows(&table).into_iter().map(|c| c.new_row.clone().unwrap()).collect();
    assert_eq!(rows, vec![vec![("name".to_string(), json!("Dana"))], vec![("name".to_string(), Value::Null)]]);
}

#[test]
fn test_navigation_discards_positional_changes() {
    let mut ledger = ChangeLedger::new();
    let table = users_table();
    let other = TableRef::new("orders");
    ledger.stage_cell_edit(&table, 0, "name", json!("a"), json!("b"), by_id(1));
    ledger.stage_row_delete(&table, 1, vec![], by_id(2));
    let insert = ledger.stage_insert(&table, vec![]);
    ledger.stage_cell_edit(&other, 0, "total", json!(1), json!(2), by_id(9));

    ledger.discard_positional(&table, true);
    let kinds: Vec<ChangeKind> = ledger.list_for(&table).iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ChangeKind::Insert]);
    assert!(ledger.get(&insert).is_some());
    assert_eq!(ledger.len_for(&other), 1);

    ledger.discard_positional(&table, false);
    assert_eq!(ledger.len_for(&table), 0);
    assert_eq!(ledger.len_for(&other), 1);
}

#[test]
fn test_clear_committed_keeps_changes_restaged_meanwhile() {
    let mut ledger = ChangeLedger::new();
    let table = users_table();
    ledger.stage_cell_edit(&table, 0, "name", json!("a"), json!("b"), by_id(1));
    ledger.stage_cell_edit(&table, 1, "name", json!("c"), json!("d"), by_id(2));
    let snapshot = ledger.snapshot(&table);

    ledger.stage_cell_edit(&table, 1, "name", json!("d"), json!("e"), by_id(2));
    ledger.clear_committed(&snapshot);

    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.cell_change(&table, 1, "name").unwrap().new, json!("e"));
}
