//! Split and Merge Transparency Tests
//!
//! Changing the range layout between page fetches must not change the rows
//! a query returns, nor their order for ORDER BY. Parallel plans restart a
//! merged range from its beginning, so they may repeat rows across a merge
//! but never lose one.

mod common;

use std::collections::BTreeSet;

use common::*;
use crossquery::query::SortOrder;
use crossquery::QueryInfo;

// =============================================================================
// Splits
// =============================================================================

/// A split under a live parallel iterator loses and repeats nothing.
#[tokio::test]
async fn test_parallel_split_mid_drain() {
    init_tracing();
    let container = people(2, 60);
    let mut iterator = open(&container, &QueryInfo::default(), &config(5), None).await.unwrap();

    let mut rows = Vec::new();
    let mut page_count = 0;
    while let Some(page) = iterator.next_page().await {
        rows.extend(page.unwrap().documents);
        page_count += 1;
        if page_count == 2 {
            let first = container.ranges()[0].clone();
            container.split(&first).unwrap();
        }
    }

    assert_eq!(sorted_ids(&rows), (0..60).collect::<Vec<u64>>());
    assert_eq!(iterator.metrics().splits, 1);
}

/// A split between resumptions keeps the ORDER BY sequence intact.
#[tokio::test]
async fn test_order_by_split_between_resumes() {
    init_tracing();
    let fields = [("age", SortOrder::Descending)];
    let container = sorted_people(2, 48, &fields);
    let info = order_by_plan(&fields);
    let config = config(4);

    let unsplit = drain(&container, &info, &config).await;
    let resumed = drain_resuming_with(&container, &info, &config, |pages, container| {
        if pages == 3 || pages == 6 {
            let widest = container.ranges()[0].clone();
            container.split(&widest).unwrap();
        }
    })
    .await;

    assert_eq!(container.ranges().len(), 4);
    assert_eq!(ids(&resumed), ids(&unsplit));
}

/// A split under a live ORDER BY iterator keeps the sequence intact.
#[tokio::test]
async fn test_order_by_split_mid_drain() {
    init_tracing();
    let fields = [("age", SortOrder::Ascending), ("name", SortOrder::Descending)];
    let container = sorted_people(3, 45, &fields);
    let info = order_by_plan(&fields);
    let config = config(6);
    let unsplit = drain(&container, &info, &config).await;

    let mut iterator = open(&container, &info, &config, None).await.unwrap();
    let mut rows = Vec::new();
    let mut page_count = 0;
    while let Some(page) = iterator.next_page().await {
        rows.extend(page.unwrap().documents);
        page_count += 1;
        if page_count == 1 {
            let middle = container.ranges()[1].clone();
            container.split(&middle).unwrap();
        }
    }
    assert_eq!(ids(&rows), ids(&unsplit));
}

// =============================================================================
// Merges
// =============================================================================

/// A merge under a parallel iterator may repeat rows but loses none.
#[tokio::test]
async fn test_parallel_merge_is_at_least_once() {
    init_tracing();
    let container = people(2, 40);
    let mut iterator = open(&container, &QueryInfo::default(), &config(6), None).await.unwrap();

    let mut rows = Vec::new();
    let mut page_count = 0;
    while let Some(page) = iterator.next_page().await {
        rows.extend(page.unwrap().documents);
        page_count += 1;
        if page_count == 2 {
            let ranges = container.ranges();
            container.merge(&ranges[0], &ranges[1]).unwrap();
        }
    }

    let unique: BTreeSet<u64> = ids(&rows).into_iter().collect();
    assert_eq!(unique.len(), 40);
    assert!(rows.len() >= 40);
    assert_eq!(iterator.metrics().merges, 1);
}

/// A merge between ORDER BY resumptions neither repeats nor reorders rows.
#[tokio::test]
async fn test_order_by_merge_between_resumes() {
    init_tracing();
    let fields = [("age", SortOrder::Ascending)];
    let container = sorted_people(3, 39, &fields);
    let info = order_by_plan(&fields);
    let config = config(5);

    let unmerged = drain(&container, &info, &config).await;
    let resumed = drain_resuming_with(&container, &info, &config, |pages, container| {
        if pages == 2 {
            let ranges = container.ranges();
            container.merge(&ranges[0], &ranges[1]).unwrap();
        }
    })
    .await;

    assert_eq!(container.ranges().len(), 2);
    assert_eq!(ids(&resumed), ids(&unmerged));
}
