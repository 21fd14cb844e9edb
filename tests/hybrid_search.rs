//! Hybrid Search Tests
//!
//! Corpus statistics reach the full-text component, component rankings
//! fuse by reciprocal rank, and hybrid results never offer a
//! continuation.

mod common;

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use common::*;
use crossquery::observability::Trace;
use crossquery::pagination::{
    DocumentContainer, FeedRange, FeedRangeProvider, FeedRangeState, InMemoryContainer, QueryBehavior,
    QueryDataSource, QueryPaginationOptions,
};
use crossquery::pipeline::{HybridSearchContinuationToken, HYBRID_SEARCH_DISALLOW_MESSAGE};
use crossquery::query::{HybridSearchQueryInfo, SortOrder};
use crossquery::{
    ContinuationToken, FeedResponse, QueryError, QueryInfo, QueryIterator, QueryPipelineConfig, QueryPage,
    QueryResult, SqlQuerySpec,
};

const FULL_TEXT_SCORE: &str = "FullTextScore(c.text, {documentdb-formattablehybridsearchquery-totaldocumentcount}, \
                               {documentdb-formattablehybridsearchquery-totalwordcount-1}, \
                               {documentdb-formattablehybridsearchquery-hitcountsarray-1})";

/// Keeps the text of every query sent to a range
struct RecordingContainer {
    inner: Arc<InMemoryContainer>,
    queries: Mutex<Vec<String>>,
}

impl RecordingContainer {
    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl QueryDataSource for RecordingContainer {
    fn monadic_query<'a>(
        &'a self,
        query: &'a SqlQuerySpec,
        feed_range_state: &'a FeedRangeState,
        options: &'a QueryPaginationOptions,
        trace: &'a Trace,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, QueryResult<QueryPage>> {
        self.queries.lock().unwrap().push(query.query_text.clone());
        self.inner
            .monadic_query(query, feed_range_state, options, trace, cancellation)
    }
}

impl FeedRangeProvider for RecordingContainer {
    fn get_feed_ranges<'a>(
        &'a self,
        trace: &'a Trace,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, QueryResult<Vec<FeedRange>>> {
        self.inner.get_feed_ranges(trace, cancellation)
    }

    fn get_child_ranges<'a>(
        &'a self,
        range: &'a FeedRange,
        trace: &'a Trace,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, QueryResult<Vec<FeedRange>>> {
        self.inner.get_child_ranges(range, trace, cancellation)
    }

    fn refresh_provider<'a>(
        &'a self,
        trace: &'a Trace,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, QueryResult<()>> {
        self.inner.refresh_provider(trace, cancellation)
    }
}

fn scored(doc: &Value) -> Option<Value> {
    Some(json!({
        "payload": doc,
        "componentScores": [doc["vector"], doc["text_score"]],
    }))
}

/// One statistics row per page: documents, words and documents mentioning "rust"
fn statistics_row(rows: Vec<Value>) -> Vec<Value> {
    let texts: Vec<&str> = rows.iter().filter_map(|row| row["text"].as_str()).collect();
    let words: usize = texts.iter().map(|text| text.split_whitespace().count()).sum();
    let hits = texts.iter().filter(|text| text.contains("rust")).count();
    vec![json!({
        "documentCount": rows.len(),
        "fullTextStatistics": [{"totalWordCount": words, "hitCounts": [hits]}],
    })]
}

/// Vector ranks A B D C, full-text ranks B C D A; fused B A C D
fn corpus() -> Arc<RecordingContainer> {
    let container = InMemoryContainer::new(3)
        .with_behavior_for(
            "/* statistics */",
            QueryBehavior::passthrough().with_page_reducer(statistics_row),
        )
        .with_behavior_for(
            "/* vector */",
            QueryBehavior::order_by(&[("vector", SortOrder::Descending)]).with_projection(scored),
        )
        .with_behavior_for(
            "/* fulltext */",
            QueryBehavior::order_by(&[("text_score", SortOrder::Descending)]).with_projection(scored),
        );
    for (id, vector, text_score, text) in [
        ("A", 0.9, 1.0, "rust is fast"),
        ("B", 0.8, 9.0, "rust rust rust"),
        ("C", 0.1, 5.0, "go is simple"),
        ("D", 0.5, 3.0, "rust and go"),
    ] {
        container.insert(
            id,
            json!({ "id": id, "vector": vector, "text_score": text_score, "text": text }),
        );
    }
    Arc::new(RecordingContainer {
        inner: Arc::new(container),
        queries: Mutex::new(Vec::new()),
    })
}

fn component(marker: &str, expression: &str) -> QueryInfo {
    QueryInfo {
        order_by: vec![SortOrder::Descending],
        order_by_expressions: vec![expression.to_string()],
        rewritten_query: format!(
            "SELECT {} c._rid, [{{\"item\": {}}}] AS orderByItems, c AS payload FROM c ORDER BY {} DESC",
            marker, expression, expression
        ),
        has_non_streaming_order_by: true,
        ..Default::default()
    }
}

fn hybrid_plan(components: Vec<QueryInfo>, skip: Option<u64>, take: Option<u64>) -> QueryInfo {
    QueryInfo {
        hybrid_search_query_info: Some(HybridSearchQueryInfo {
            global_statistics_query: "SELECT /* statistics */ COUNT(1) AS documentCount FROM c".to_string(),
            component_query_infos: components,
            skip,
            take,
            requires_global_statistics: true,
        }),
        ..Default::default()
    }
}

fn vector_and_text(skip: Option<u64>, take: Option<u64>) -> QueryInfo {
    hybrid_plan(
        vec![
            component("/* vector */", "VectorDistance(c.embedding, [0.1, 0.2])"),
            component("/* fulltext */", FULL_TEXT_SCORE),
        ],
        skip,
        take,
    )
}

async fn run(
    container: &Arc<RecordingContainer>,
    info: &QueryInfo,
    config: &QueryPipelineConfig,
    continuation: Option<&str>,
) -> QueryResult<Vec<FeedResponse>> {
    let mut iterator = QueryIterator::create(
        Arc::clone(container) as Arc<dyn DocumentContainer>,
        SqlQuerySpec::new("SELECT * FROM c ORDER BY RANK RRF(...)"),
        info.clone(),
        None,
        config,
        continuation,
        CancellationToken::new(),
    )
    .await?;
    let mut pages = Vec::new();
    while let Some(page) = iterator.next_page().await {
        pages.push(page?);
    }
    assert!(iterator.is_finished());
    Ok(pages)
}

fn letters(pages: &[FeedResponse]) -> Vec<String> {
    pages
        .iter()
        .flat_map(|page| page.documents.iter())
        .map(|doc| doc["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_components_fuse_by_reciprocal_rank() {
    init_tracing();
    let container = corpus();
    let pages = run(&container, &vector_and_text(None, None), &config(2), None).await.unwrap();

    assert_eq!(letters(&pages), vec!["B", "A", "C", "D"]);
    assert!(pages.iter().all(|page| page.continuation.is_none()));
    assert!(pages
        .iter()
        .take(pages.len() - 1)
        .all(|page| page.disallow_continuation_token_message.as_deref() == Some(HYBRID_SEARCH_DISALLOW_MESSAGE)));
    let charge: f64 = pages.iter().map(|page| page.request_charge).sum();
    assert!(charge > 0.0);
}

#[tokio::test]
async fn test_statistics_are_substituted_into_components() {
    init_tracing();
    let container = corpus();
    run(&container, &vector_and_text(None, None), &config(10), None).await.unwrap();

    let queries = container.queries();
    let statistics = queries.iter().filter(|q| q.contains("/* statistics */")).count();
    assert_eq!(statistics, 3, "one statistics request per range");

    let full_text: Vec<&String> = queries.iter().filter(|q| q.contains("/* fulltext */")).collect();
    assert!(!full_text.is_empty());
    for query in full_text {
        assert!(query.contains("FullTextScore(c.text, 4, 12, [3])"), "{}", query);
        assert!(!query.contains("{documentdb-formattablehybridsearchquery"), "{}", query);
    }
    // The vector component consumed no statistics entry.
    assert!(queries
        .iter()
        .filter(|q| q.contains("/* vector */"))
        .all(|q| q.contains("VectorDistance(c.embedding, [0.1, 0.2])")));
}

#[tokio::test]
async fn test_skip_and_take_apply_after_fusion() {
    init_tracing();
    let container = corpus();
    let pages = run(&container, &vector_and_text(Some(1), Some(2)), &config(10), None).await.unwrap();
    assert_eq!(letters(&pages), vec!["A", "C"]);
}

#[tokio::test]
async fn test_single_component_is_forwarded_in_order() {
    init_tracing();
    let container = corpus();
    let mut info = hybrid_plan(
        vec![component("/* vector */", "VectorDistance(c.embedding, [0.1, 0.2])")],
        None,
        None,
    );
    if let Some(hybrid) = info.hybrid_search_query_info.as_mut() {
        hybrid.requires_global_statistics = false;
    }
    let pages = run(&container, &info, &config(3), None).await.unwrap();

    assert_eq!(letters(&pages), vec!["A", "B", "D", "C"]);
    assert!(pages.iter().all(|page| page.continuation.is_none()));
    assert!(container.queries().iter().all(|q| !q.contains("/* statistics */")));
}

#[tokio::test]
async fn test_hybrid_search_continuation_rejected() {
    init_tracing();
    let container = corpus();
    let token = ContinuationToken::HybridSearch(HybridSearchContinuationToken {}).encode();
    let result = run(&container, &vector_and_text(None, None), &config(2), Some(&token)).await;
    assert!(matches!(result, Err(QueryError::InvalidArgument(_))));
    assert!(container.queries().is_empty());
}

#[tokio::test]
async fn test_non_numeric_score_fails_the_query() {
    init_tracing();
    let container = InMemoryContainer::new(1).with_behavior_for(
        "/* vector */",
        QueryBehavior::order_by(&[("vector", SortOrder::Descending)])
            .with_projection(|doc| Some(json!({ "payload": doc, "componentScores": ["high", 1] }))),
    );
    container.insert("a", json!({ "id": "A", "vector": 0.3 }));
    container.insert("b", json!({ "id": "B", "vector": 0.2 }));
    let container = Arc::new(RecordingContainer {
        inner: Arc::new(container),
        queries: Mutex::new(Vec::new()),
    });
    let mut info = hybrid_plan(
        vec![
            component("/* vector */", "VectorDistance(c.embedding, [1])"),
            component("/* vector */", "VectorDistance(c.embedding, [2])"),
        ],
        None,
        None,
    );
    if let Some(hybrid) = info.hybrid_search_query_info.as_mut() {
        hybrid.requires_global_statistics = false;
    }

    let mut iterator = QueryIterator::create(
        Arc::clone(&container) as Arc<dyn DocumentContainer>,
        SqlQuerySpec::new("SELECT * FROM c"),
        info,
        None,
        &config(10),
        None,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    match iterator.next_page().await {
        Some(Err(QueryError::Internal(message))) => assert!(message.contains("not a number"), "{}", message),
        other => panic!("expected an internal failure, got {:?}", other),
    }
    assert!(iterator.collect_all().await.unwrap().is_empty());
    assert!(iterator.is_finished());
}
