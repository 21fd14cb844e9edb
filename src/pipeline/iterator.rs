//! Caller-facing query iterator
//!
//! Wraps an assembled stage chain and turns its pages into `FeedResponse`
//! values whose continuation is the opaque encoded token string.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::context::CrossPartitionContext;
use super::factory::PipelineFactory;
use super::stage::{take_inner_result, QueryPipelineStage};
use super::token::ContinuationToken;
use crate::config::QueryPipelineConfig;
use crate::errors::QueryResult;
use crate::observability::{MetricsSnapshot, PipelineEvent, Trace};
use crate::pagination::{DocumentContainer, FeedRange};
use crate::query::{QueryInfo, SqlQuerySpec};

/// One page handed to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct FeedResponse {
    pub documents: Vec<Value>,
    pub request_charge: f64,
    pub activity_id: String,
    /// Pass back to `QueryIterator::create` to resume; `None` when done
    /// or when the query cannot be resumed
    pub continuation: Option<String>,
    /// Why no continuation is offered although pages remain
    pub disallow_continuation_token_message: Option<String>,
}

pub struct QueryIterator {
    stage: QueryPipelineStage,
    trace: Arc<Trace>,
    pages: u64,
    finished: bool,
}

impl QueryIterator {
    /// Build the pipeline for `query_info` over `target_ranges`, or over
    /// every range of the container when none are given.
    pub async fn create(
        container: Arc<dyn DocumentContainer>,
        query: SqlQuerySpec,
        query_info: QueryInfo,
        target_ranges: Option<Vec<FeedRange>>,
        config: &QueryPipelineConfig,
        continuation: Option<&str>,
        cancellation: CancellationToken,
    ) -> QueryResult<Self> {
        config.validate()?;
        query_info.validate()?;
        let trace = Trace::root("query");

        let token = match continuation {
            Some(encoded) => match ContinuationToken::decode(encoded) {
                Ok(token) => Some(token),
                Err(error) => {
                    tracing::warn!(
                        event = %PipelineEvent::ContinuationDecodeFailed,
                        code = error.code(),
                        "rejected continuation: {}",
                        error
                    );
                    return Err(error);
                }
            },
            None => None,
        };

        let target_ranges = match target_ranges {
            Some(ranges) if !ranges.is_empty() => ranges,
            _ => container.get_feed_ranges(&trace, &cancellation).await?,
        };

        let query = if query_info.rewritten_query.is_empty() {
            query
        } else {
            SqlQuerySpec {
                query_text: query_info.rewritten_query.clone(),
                parameters: query.parameters,
            }
        };

        let range_count = target_ranges.len();
        let context = CrossPartitionContext::new(container, query, target_ranges, config.page_size(), cancellation)
            .with_max_concurrency(config.max_concurrency)
            .with_prefetch_policy(config.prefetch_policy)
            .with_backend_page_size(config.page_size_for_top(rows_kept(&query_info)));
        let stage = PipelineFactory::monadic_create(&context, &query_info, token)?;

        tracing::debug!(
            event = %PipelineEvent::PipelineCreated,
            ranges = range_count,
            resumed = continuation.is_some(),
            "query pipeline assembled"
        );
        Ok(Self {
            stage,
            trace,
            pages: 0,
            finished: false,
        })
    }

    /// Next page, or `None` once the query is done
    pub async fn next_page(&mut self) -> Option<QueryResult<FeedResponse>> {
        if self.finished {
            return None;
        }
        let trace = self.trace.start_child(format!("page [{}]", self.pages));
        self.pages += 1;
        if !self.stage.move_next(&trace).await {
            self.finished = true;
            return None;
        }

        let page = match take_inner_result(&mut self.stage) {
            Ok(page) => page,
            Err(error) => return Some(Err(error)),
        };
        trace.add_datum("requestCharge", page.request_charge);
        trace.add_datum("documents", page.documents.len() as u64);

        let continuation = match page.state.as_ref() {
            Some(_) if page.disallow_continuation_token_message.is_some() => None,
            Some(state) => match ContinuationToken::from_state(state) {
                Ok(token) => Some(token.encode()),
                Err(error) => return Some(Err(error)),
            },
            None => {
                self.finished = true;
                None
            }
        };
        Some(Ok(FeedResponse {
            documents: page.documents,
            request_charge: page.request_charge,
            activity_id: page.activity_id,
            continuation,
            disallow_continuation_token_message: page.disallow_continuation_token_message,
        }))
    }

    /// Drain every remaining page
    pub async fn collect_all(&mut self) -> QueryResult<Vec<Value>> {
        let mut documents = Vec::new();
        while let Some(response) = self.next_page().await {
            documents.extend(response?.documents);
        }
        Ok(documents)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn trace(&self) -> &Arc<Trace> {
        &self.trace
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.trace.metrics().snapshot()
    }

    pub fn dispose(&mut self) {
        self.finished = true;
        self.stage.dispose();
    }
}

/// Rows the query can return at most, when that bounds backend paging
fn rows_kept(query_info: &QueryInfo) -> Option<u64> {
    if query_info.is_hybrid_search() {
        return None;
    }
    if query_info.has_aggregates() || query_info.has_group_by() || query_info.has_dcount() {
        return None;
    }
    query_info.top.or_else(|| {
        query_info
            .limit
            .map(|limit| limit.saturating_add(query_info.offset.unwrap_or(0)))
    })
}
