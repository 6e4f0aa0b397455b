//! Edge case tests for crudsync-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use crudsync_engine::{
    batch, coerce, filter, list, path, ColumnSchema, ColumnType, EntityRef, Error, Filter,
    MutationKind, Operator, Predicate, Row, SchemaRegistry, SessionSnapshot, SubmitErrors,
    SyncState, TableSchema, Value,
};
use serde_json::json;

fn create_test_registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .with_table(
            "orders",
            TableSchema::new(
                "id",
                vec![
                    ColumnSchema::new("item", ColumnType::String),
                    ColumnSchema::new("qty", ColumnType::Int),
                    ColumnSchema::new("placed", ColumnType::DateTime),
                ],
            ),
        )
        .with_table(
            "student",
            TableSchema::new(
                "id",
                vec![
                    ColumnSchema::new("name", ColumnType::String),
                    ColumnSchema::new("birthday", ColumnType::Date),
                ],
            ),
        )
}

fn create_test_state() -> SyncState {
    let mut state = SyncState::new(1_000);
    state.replace_registry(create_test_registry());
    state
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ============================================================================
// Path Edge Cases
// ============================================================================

#[test]
fn all_id_notations_agree() {
    let expected = path::parse("/student/1");
    for notation in ["/student(1)", "/student('1')", "/student(\"1\")", "student/1/"] {
        assert_eq!(path::parse(notation), expected, "notation {}", notation);
    }
    assert_eq!(expected.raw_path, "/student/1");
}

#[test]
fn query_string_is_kept() {
    let r = path::parse("/student('7')?filter=age,gt,3");
    assert_eq!(r.id.as_deref(), Some("7"));
    assert_eq!(r.query, "filter=age,gt,3");
    assert_eq!(r.to_string(), "/student/7?filter=age,gt,3");
}

#[test]
fn empty_and_root_paths() {
    for p in ["", "/", "//", "?x=1", "/student('1"] {
        let r = path::parse(p);
        assert!(r.is_empty(), "{:?} should be empty", p);
        assert_eq!(r.id, None);
    }
}

#[test]
fn unicode_ids() {
    let r = path::parse("/student/日本");
    assert_eq!(r.id.as_deref(), Some("日本"));
}

// ============================================================================
// Mutation Edge Cases
// ============================================================================

#[test]
fn empty_path_never_reaches_log() {
    let mut state = create_test_state();
    let result = state.stage_update(&path::parse(""), row(&[("item", "x".into())]));
    assert!(matches!(result, Err(Error::InvalidPath(_))));
    assert!(!state.log.has_pending_changes());
}

#[test]
fn rapid_creates_get_distinct_temp_ids() {
    let mut state = create_test_state();
    let target = path::parse("/orders");
    let ids: Vec<_> = (0..500)
        .map(|i| {
            state
                .stage_create(&target, row(&[("qty", Value::Int(i))]))
                .unwrap()
        })
        .collect();

    let mut unique = ids.clone();
    unique.dedup();
    assert_eq!(unique.len(), 500);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(state.log.pending(MutationKind::Create), 500);
}

#[test]
fn create_then_many_updates_is_one_entry() {
    let mut state = create_test_state();
    let temp = state
        .stage_create(&path::parse("/orders"), row(&[("item", "a".into())]))
        .unwrap();
    let target = EntityRef::row("orders", temp.to_string());

    for i in 0..50 {
        state
            .stage_update(&target, row(&[("qty", Value::Int(i))]))
            .unwrap();
    }

    assert_eq!(state.log.pending_count(), 1);
    assert_eq!(
        state.log.creates()["orders"][&temp.to_string()]["qty"],
        Value::Int(49)
    );
}

#[test]
fn integer_boundaries() {
    let mut state = create_test_state();
    state.store.put_row("orders", "1", Row::new());
    for v in [i64::MIN, -1, 0, i64::MAX] {
        state
            .stage_update(&path::parse("/orders/1"), row(&[("qty", Value::Int(v))]))
            .unwrap();
        assert_eq!(state.store.get_row("orders", "1").unwrap()["qty"], Value::Int(v));
    }
}

// ============================================================================
// Coercion Edge Cases
// ============================================================================

#[test]
fn leap_day_and_invalid_dates() {
    let registry = create_test_registry();
    let leap = coerce::from_wire(&registry, "student", "birthday", json!("2024-02-29"));
    assert!(matches!(leap, Value::Date(_)));

    let bad = coerce::from_wire(&registry, "student", "birthday", json!("2023-02-29"));
    assert_eq!(bad, Value::InvalidDate("2023-02-29".into()));
    assert_eq!(coerce::to_wire(&registry, "student", "birthday", &bad), json!(""));
}

#[test]
fn unknown_columns_pass_through() {
    let registry = create_test_registry();
    let v = json!({"nested": [1, 2]});
    let canonical = coerce::from_wire(&registry, "student", "extra", v.clone());
    assert_eq!(coerce::to_wire(&registry, "student", "extra", &canonical), v);
}

// ============================================================================
// Filter Edge Cases
// ============================================================================

#[test]
fn date_values_compile_in_wire_format() {
    let d = chrono::NaiveDate::from_ymd_opt(2020, 1, 31).unwrap();
    let q = filter::compile(&[Predicate::new("birthday", Operator::Ge, d).into()]).unwrap();
    assert_eq!(q, "filter=birthday,ge,2020-01-31");
}

#[test]
fn single_predicate_group_compiles_as_one_filter() {
    let q = filter::compile(&[Filter::any(vec![Predicate::equals("id", 5)])]).unwrap();
    assert_eq!(q, "filter=id,eq,5");
}

// ============================================================================
// Submission Edge Cases
// ============================================================================

#[test]
fn create_succeeds_while_unrelated_delete_fails() {
    let mut state = create_test_state();
    state
        .stage_create(&path::parse("/orders"), row(&[("item", "pen".into())]))
        .unwrap();
    state.stage_delete(&path::parse("/student/3")).unwrap();

    let mut errors = SubmitErrors::default();
    for phase in MutationKind::ALL {
        for request in batch::plan(&state, phase) {
            match phase {
                MutationKind::Create => {
                    batch::settle(&mut state, &request, &json!([77]));
                }
                _ => errors.record(phase, &request.collection, "HTTP 500"),
            }
        }
    }

    let err = errors.finish(&state).unwrap_err();
    assert_eq!(err.phases.len(), 1);
    assert!(err.get(MutationKind::Delete).is_some());
    assert!(state.log.creates().is_empty());
    assert!(state.log.is_pending_delete("student", "3"));
    assert!(state.store.contains("orders", "77"));
}

#[test]
fn update_planned_after_create_targets_server_id() {
    let mut state = create_test_state();
    let temp = state
        .stage_create(&path::parse("/orders"), row(&[("item", "a".into())]))
        .unwrap();
    let create = batch::plan(&state, MutationKind::Create).remove(0);
    state
        .stage_update(
            &EntityRef::row("orders", temp.to_string()),
            row(&[("qty", Value::Int(3))]),
        )
        .unwrap();

    batch::settle(&mut state, &create, &json!([12]));
    let update = batch::plan(&state, MutationKind::Update).remove(0);
    assert_eq!(update.path(), "orders/12");
    assert_eq!(update.body, Some(json!([{"qty": 3}])));
}

#[test]
fn garbage_create_response_keeps_entries() {
    let mut state = create_test_state();
    state
        .stage_create(&path::parse("/orders"), row(&[("item", "a".into())]))
        .unwrap();
    let request = batch::plan(&state, MutationKind::Create).remove(0);

    let settlement = batch::settle(&mut state, &request, &json!({"weird": true}));
    assert!(!settlement.is_complete());
    assert_eq!(state.log.pending(MutationKind::Create), 1);
}

// ============================================================================
// List Decoding Edge Cases
// ============================================================================

#[test]
fn records_shorter_than_columns() {
    let registry = create_test_registry();
    let response = json!({"orders": {"columns": ["id", "item", "qty"], "records": [[1, "a"]]}});
    let rows = list::decode_list(&registry, "orders", "id", &response);
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].1.contains_key("qty"));
}

// ============================================================================
// Snapshot Edge Cases
// ============================================================================

#[test]
fn snapshot_empty_state() {
    let state = create_test_state();
    let json = state.snapshot().to_json().unwrap();
    let restored = SessionSnapshot::from_json(&json).unwrap();
    assert_eq!(restored.row_count(), 0);
    assert!(!restored.log.has_pending_changes());
}

#[test]
fn snapshot_preserves_temp_id_sequence() {
    let mut state = create_test_state();
    state
        .stage_create(&path::parse("/orders"), row(&[("item", "a".into())]))
        .unwrap();

    let mut restored = create_test_state();
    restored.restore(state.snapshot()).unwrap();
    let next = restored
        .stage_create(&path::parse("/orders"), row(&[("item", "b".into())]))
        .unwrap();
    assert_eq!(next, 1_001);
}

#[test]
fn malformed_snapshot_json() {
    assert!(matches!(
        SessionSnapshot::from_json("{not json"),
        Err(Error::InvalidSnapshot(_))
    ));
}
