//! Shared fixtures for the integration suites
//!
//! Dataset builders over `InMemoryContainer`, and drivers that run a plan
//! either in one pass or by rebuilding the iterator from every
//! continuation it hands out.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crossquery::pagination::{DocumentContainer, InMemoryContainer, QueryBehavior};
use crossquery::query::SortOrder;
use crossquery::{FeedResponse, QueryInfo, QueryIterator, QueryPipelineConfig, QueryResult, SqlQuerySpec};

static TRACING: Once = Once::new();

/// Route pipeline logs to the test writer; `RUST_LOG` picks the level
pub fn init_tracing() {
    TRACING.call_once(|| {
        let env_filter = EnvFilter::builder()
            .with_default_directive(tracing::Level::WARN.into())
            .from_env_lossy();
        let subscriber = FmtSubscriber::builder()
            .with_test_writer()
            .with_env_filter(env_filter)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// `{"id", "age", "name"}` rows; ages repeat so sort keys tie
pub fn person(id: usize) -> Value {
    json!({
        "id": id,
        "age": (id * 7) % 13,
        "name": format!("person-{:03}", id),
    })
}

pub fn fill(container: InMemoryContainer, count: usize) -> Arc<InMemoryContainer> {
    for id in 0..count {
        container.insert(&format!("pk-{}", id), person(id));
    }
    Arc::new(container)
}

/// Unordered container of `count` people over `partitions` ranges
pub fn people(partitions: usize, count: usize) -> Arc<InMemoryContainer> {
    fill(InMemoryContainer::new(partitions), count)
}

/// Container whose ranges return rows sorted by `fields`
pub fn sorted_people(partitions: usize, count: usize, fields: &[(&str, SortOrder)]) -> Arc<InMemoryContainer> {
    fill(
        InMemoryContainer::new(partitions).with_behavior(QueryBehavior::order_by(fields)),
        count,
    )
}

/// Plan for `ORDER BY` over top-level fields
pub fn order_by_plan(fields: &[(&str, SortOrder)]) -> QueryInfo {
    QueryInfo {
        order_by: fields.iter().map(|(_, order)| *order).collect(),
        order_by_expressions: fields.iter().map(|(field, _)| format!("c.{}", field)).collect(),
        rewritten_query: "SELECT c._rid, [{\"item\": c.age}] AS orderByItems, c AS payload \
                          FROM c WHERE {documentdb-formattableorderbyquery-filter} ORDER BY c.age"
            .to_string(),
        ..Default::default()
    }
}

pub fn config(page_size: i32) -> QueryPipelineConfig {
    QueryPipelineConfig::with_page_size(page_size)
}

pub async fn open(
    container: &Arc<InMemoryContainer>,
    info: &QueryInfo,
    config: &QueryPipelineConfig,
    continuation: Option<&str>,
) -> QueryResult<QueryIterator> {
    QueryIterator::create(
        Arc::clone(container) as Arc<dyn DocumentContainer>,
        SqlQuerySpec::new("SELECT * FROM c"),
        info.clone(),
        None,
        config,
        continuation,
        CancellationToken::new(),
    )
    .await
}

/// Every row in one pass
pub async fn drain(container: &Arc<InMemoryContainer>, info: &QueryInfo, config: &QueryPipelineConfig) -> Vec<Value> {
    let mut iterator = open(container, info, config, None).await.unwrap();
    iterator.collect_all().await.unwrap()
}

/// Every page in one pass
pub async fn pages(
    container: &Arc<InMemoryContainer>,
    info: &QueryInfo,
    config: &QueryPipelineConfig,
) -> Vec<FeedResponse> {
    let mut iterator = open(container, info, config, None).await.unwrap();
    let mut pages = Vec::new();
    while let Some(page) = iterator.next_page().await {
        pages.push(page.unwrap());
    }
    pages
}

/// Every row, rebuilding the iterator from the continuation after each
/// page. `between` runs before each rebuild with the number of pages read.
///
/// Panics once the rebuilds exceed what any plan over the container can
/// need, so a continuation that never advances fails instead of hanging.
pub async fn drain_resuming_with(
    container: &Arc<InMemoryContainer>,
    info: &QueryInfo,
    config: &QueryPipelineConfig,
    mut between: impl FnMut(usize, &InMemoryContainer),
) -> Vec<Value> {
    let max_pages = resume_page_limit(container);
    let mut rows = Vec::new();
    let mut continuation: Option<String> = None;
    let mut pages = 0;
    loop {
        if pages >= max_pages {
            panic!(
                "continuation did not finish after {} pages; rows so far: {:?}",
                pages,
                rows
            );
        }
        let mut iterator = open(container, info, config, continuation.as_deref()).await.unwrap();
        let page = match iterator.next_page().await {
            Some(page) => page.unwrap(),
            None => return rows,
        };
        rows.extend(page.documents);
        pages += 1;
        match page.continuation {
            Some(token) => continuation = Some(token),
            None => return rows,
        }
        between(pages, container);
    }
}

/// Upper bound on pages for one drain: a fetch page and a row page per
/// document, plus one per range, with room for splits
pub fn resume_page_limit(container: &InMemoryContainer) -> usize {
    4 * container.document_count() + 4 * container.ranges().len() + 16
}

pub async fn drain_resuming(
    container: &Arc<InMemoryContainer>,
    info: &QueryInfo,
    config: &QueryPipelineConfig,
) -> Vec<Value> {
    drain_resuming_with(container, info, config, |_, _| {}).await
}

pub fn ids(rows: &[Value]) -> Vec<u64> {
    rows.iter().map(|row| row["id"].as_u64().unwrap()).collect()
}

pub fn sorted_ids(rows: &[Value]) -> Vec<u64> {
    let mut ids = ids(rows);
    ids.sort_unstable();
    ids
}
