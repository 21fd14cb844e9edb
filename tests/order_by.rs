//! ORDER BY Tests
//!
//! The k-way merge must emit one total order across every range, break
//! exact key ties by resource id, and agree with the global-sort mode on
//! both rows and request charge.

mod common;

use std::cmp::Ordering;

use serde_json::Value;

use common::*;
use crossquery::pagination::compare_rids;
use crossquery::pipeline::order_by::compare_values;
use crossquery::query::SortOrder;
use crossquery::QueryInfo;

fn assert_total_order(rows: &[Value], field: &str, order: SortOrder) {
    for pair in rows.windows(2) {
        let mut by_key = compare_values(pair[0].get(field), pair[1].get(field));
        let mut by_rid = compare_rids(
            pair[0]["_rid"].as_str().unwrap(),
            pair[1]["_rid"].as_str().unwrap(),
        );
        if order == SortOrder::Descending {
            by_key = by_key.reverse();
            by_rid = by_rid.reverse();
        }
        match by_key {
            Ordering::Less => {}
            Ordering::Equal => assert_eq!(by_rid, Ordering::Less, "tie not broken by rid: {:?}", pair),
            Ordering::Greater => panic!("rows out of order: {:?}", pair),
        }
    }
}

// =============================================================================
// Total Order
// =============================================================================

/// Ascending merge over many ranges, with heavy key ties.
#[tokio::test]
async fn test_ascending_total_order() {
    init_tracing();
    let fields = [("age", SortOrder::Ascending)];
    let container = sorted_people(4, 80, &fields);
    let rows = drain(&container, &order_by_plan(&fields), &config(7)).await;
    assert_eq!(sorted_ids(&rows), (0..80).collect::<Vec<u64>>());
    assert_total_order(&rows, "age", SortOrder::Ascending);
}

/// Descending merge; ties follow the first column's direction.
#[tokio::test]
async fn test_descending_total_order() {
    init_tracing();
    let fields = [("age", SortOrder::Descending)];
    let container = sorted_people(3, 50, &fields);
    let rows = drain(&container, &order_by_plan(&fields), &config(4)).await;
    assert_eq!(rows.len(), 50);
    assert_total_order(&rows, "age", SortOrder::Descending);
}

/// TOP keeps the head of the merged order.
#[tokio::test]
async fn test_top_is_prefix_of_full_order() {
    init_tracing();
    let fields = [("age", SortOrder::Ascending)];
    let container = sorted_people(3, 30, &fields);
    let full = drain(&container, &order_by_plan(&fields), &config(10)).await;
    let info = QueryInfo {
        top: Some(5),
        ..order_by_plan(&fields)
    };
    let top = drain(&container, &info, &config(10)).await;
    assert_eq!(ids(&top), ids(&full[..5]));
}

// =============================================================================
// Streaming / Non-Streaming Parity
// =============================================================================

/// Both modes return the same sequence for the same total charge.
#[tokio::test]
async fn test_streaming_and_non_streaming_agree() {
    init_tracing();
    let fields = [("age", SortOrder::Descending), ("name", SortOrder::Ascending)];
    let container = sorted_people(3, 37, &fields);
    let streaming_plan = order_by_plan(&fields);
    let non_streaming_plan = QueryInfo {
        has_non_streaming_order_by: true,
        ..streaming_plan.clone()
    };

    for page_size in [3, 8, 100] {
        let config = config(page_size);
        let streaming = pages(&container, &streaming_plan, &config).await;
        let non_streaming = pages(&container, &non_streaming_plan, &config).await;

        let rows = |pages: &[crossquery::FeedResponse]| -> Vec<Value> {
            pages.iter().flat_map(|p| p.documents.clone()).collect()
        };
        let charge = |pages: &[crossquery::FeedResponse]| -> f64 { pages.iter().map(|p| p.request_charge).sum() };

        assert_eq!(ids(&rows(&streaming)), ids(&rows(&non_streaming)), "page size {}", page_size);
        assert!(
            (charge(&streaming) - charge(&non_streaming)).abs() < 1e-6,
            "page size {}: {} vs {}",
            page_size,
            charge(&streaming),
            charge(&non_streaming)
        );
    }
}
