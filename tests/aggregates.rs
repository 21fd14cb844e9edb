//! Aggregate Tests
//!
//! Partial aggregates from every range fold into one result. Over zero
//! rows COUNT is 0, the list builders are empty and every other operator
//! is undefined: absent from a select list, no row at all for SELECT VALUE.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use common::*;
use crossquery::pagination::{InMemoryContainer, QueryBehavior};
use crossquery::query::{AggregateOperator, DCountInfo, DistinctQueryType};
use crossquery::QueryInfo;

fn select_value(operator: AggregateOperator) -> QueryInfo {
    QueryInfo {
        aggregates: vec![operator],
        has_select_value: true,
        ..Default::default()
    }
}

fn select_list(columns: &[(&str, AggregateOperator)]) -> QueryInfo {
    let mut info = QueryInfo {
        aggregates: columns.iter().map(|(_, op)| *op).collect(),
        group_by_aliases: columns.iter().map(|(alias, _)| alias.to_string()).collect(),
        ..Default::default()
    };
    info.group_by_alias_to_aggregate_type = columns
        .iter()
        .map(|(alias, op)| (alias.to_string(), Some(*op)))
        .collect::<BTreeMap<_, _>>();
    info
}

/// Per-page partials as a backend would compute them for `c.age`
fn partials(rows: Vec<Value>) -> Vec<Value> {
    let ages: Vec<u64> = rows.iter().filter_map(|row| row["age"].as_u64()).collect();
    if ages.is_empty() {
        return vec![json!({ "n": {"item": 0}, "avg": {"item": {"sum": 0, "count": 0}} })];
    }
    let sum: u64 = ages.iter().sum();
    vec![json!({
        "n": {"item": ages.len()},
        "total": {"item": sum},
        "avg": {"item": {"sum": sum, "count": ages.len()}},
        "lo": {"item": ages.iter().min()},
        "hi": {"item": {"max": ages.iter().max(), "count": ages.len()}},
    })]
}

// =============================================================================
// Empty Input
// =============================================================================

/// COUNT of nothing is zero.
#[tokio::test]
async fn test_count_over_empty_is_zero() {
    init_tracing();
    let container = people(3, 0);
    let rows = drain(&container, &select_value(AggregateOperator::Count), &config(10)).await;
    assert_eq!(rows, vec![json!(0)]);
}

/// SUM, AVG, MIN and MAX of nothing produce no row under SELECT VALUE.
#[tokio::test]
async fn test_undefined_select_value_emits_nothing() {
    init_tracing();
    let container = people(3, 0);
    for operator in [
        AggregateOperator::Sum,
        AggregateOperator::Average,
        AggregateOperator::Min,
        AggregateOperator::Max,
    ] {
        let rows = drain(&container, &select_value(operator), &config(10)).await;
        assert!(rows.is_empty(), "{:?} gave {:?}", operator, rows);
    }
}

/// A select list keeps the defined columns and drops the undefined ones.
#[tokio::test]
async fn test_select_list_over_empty_omits_undefined() {
    init_tracing();
    let container = people(2, 0);
    let info = select_list(&[
        ("n", AggregateOperator::Count),
        ("total", AggregateOperator::Sum),
        ("avg", AggregateOperator::Average),
        ("lo", AggregateOperator::Min),
        ("hi", AggregateOperator::Max),
        ("all", AggregateOperator::MakeList),
        ("distinct", AggregateOperator::MakeSet),
    ]);
    let rows = drain(&container, &info, &config(10)).await;
    assert_eq!(rows, vec![json!({"n": 0, "all": [], "distinct": []})]);
}

// =============================================================================
// Folding Partials
// =============================================================================

/// Every operator folds its per-page partials across ranges.
#[tokio::test]
async fn test_partials_fold_across_ranges() {
    init_tracing();
    let container = Arc::new(
        InMemoryContainer::new(4).with_behavior(QueryBehavior::passthrough().with_page_reducer(partials)),
    );
    let ages: Vec<u64> = (0..29).map(|id| ((id * 7) % 13) as u64).collect();
    for id in 0..29 {
        container.insert(&format!("pk-{}", id), person(id));
    }
    let info = select_list(&[
        ("n", AggregateOperator::Count),
        ("total", AggregateOperator::Sum),
        ("avg", AggregateOperator::Average),
        ("lo", AggregateOperator::Min),
        ("hi", AggregateOperator::Max),
    ]);
    let rows = drain(&container, &info, &config(4)).await;
    assert_eq!(rows.len(), 1);

    let row = &rows[0];
    let total: u64 = ages.iter().sum();
    assert_eq!(row["n"], json!(29));
    assert_eq!(row["total"], json!(total));
    assert!((row["avg"].as_f64().unwrap() - total as f64 / 29.0).abs() < 1e-9);
    assert_eq!(row["lo"], json!(0));
    assert_eq!(row["hi"], json!(12));
}

// =============================================================================
// DCOUNT
// =============================================================================

/// DCOUNT counts distinct values and honors its alias.
#[tokio::test]
async fn test_dcount_counts_unique_values() {
    init_tracing();
    let container = Arc::new(
        InMemoryContainer::new(3)
            .with_behavior(QueryBehavior::passthrough().with_projection(|doc| Some(doc["age"].clone()))),
    );
    for id in 0..50 {
        container.insert(&format!("pk-{}", id), person(id));
    }

    let value = QueryInfo {
        distinct_type: DistinctQueryType::Unordered,
        d_count_info: Some(DCountInfo::default()),
        ..Default::default()
    };
    assert_eq!(drain(&container, &value, &config(6)).await, vec![json!(13)]);

    let aliased = QueryInfo {
        d_count_info: Some(DCountInfo {
            d_count_alias: "ages".into(),
        }),
        ..Default::default()
    };
    assert_eq!(drain(&container, &aliased, &config(6)).await, vec![json!({"ages": 13})]);
    assert_eq!(
        drain_resuming(&container, &aliased, &config(6)).await,
        vec![json!({"ages": 13})]
    );
}
