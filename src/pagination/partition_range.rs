//! Partition-range page enumerator
//!
//! Pulls successive pages for exactly one feed range. One backend fetch per
//! `move_next`; failures are stored as the current result, never thrown,
//! and leave the range state untouched so the same page can be re-requested.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use super::container::{DocumentContainer, QueryPaginationOptions};
use super::cursor::RangeCursor;
use super::feed_range::FeedRange;
use super::page::QueryPageResult;
use super::state::{FeedRangeState, QueryState};
use crate::errors::QueryError;
use crate::observability::{PipelineEvent, Trace};
use crate::query::SqlQuerySpec;

pub struct PartitionRangePageEnumerator {
    container: Arc<dyn DocumentContainer>,
    query: SqlQuerySpec,
    feed_range_state: FeedRangeState,
    options: QueryPaginationOptions,
    cancellation: CancellationToken,
    current: Option<QueryPageResult>,
    prefetched: Option<QueryPageResult>,
    has_more_results: bool,
}

impl PartitionRangePageEnumerator {
    pub fn new(
        container: Arc<dyn DocumentContainer>,
        query: SqlQuerySpec,
        feed_range_state: FeedRangeState,
        options: QueryPaginationOptions,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            container,
            query,
            feed_range_state,
            options,
            cancellation,
            current: None,
            prefetched: None,
            has_more_results: true,
        }
    }

    /// Same container, query and options over another range state
    pub fn with_feed_range_state(&self, feed_range_state: FeedRangeState) -> Self {
        Self::new(
            Arc::clone(&self.container),
            self.query.clone(),
            feed_range_state,
            self.options.clone(),
            self.cancellation.clone(),
        )
    }

    /// Same settings with the query text replaced
    pub fn with_query(&self, query: SqlQuerySpec, feed_range_state: FeedRangeState) -> Self {
        Self::new(
            Arc::clone(&self.container),
            query,
            feed_range_state,
            self.options.clone(),
            self.cancellation.clone(),
        )
    }

    pub fn feed_range_state(&self) -> &FeedRangeState {
        &self.feed_range_state
    }

    pub fn state(&self) -> Option<&QueryState> {
        self.feed_range_state.state.as_ref()
    }

    pub fn query(&self) -> &SqlQuerySpec {
        &self.query
    }

    pub fn has_more_results(&self) -> bool {
        self.has_more_results
    }

    /// Move back to `state` so the next fetch re-requests that page
    pub fn rewind(&mut self, state: Option<QueryState>) {
        self.feed_range_state.state = state;
        self.prefetched = None;
        self.has_more_results = true;
    }

    pub fn has_prefetched(&self) -> bool {
        self.prefetched.is_some()
    }

    pub fn current(&self) -> Option<&QueryPageResult> {
        self.current.as_ref()
    }

    pub fn take_current(&mut self) -> Option<QueryPageResult> {
        self.current.take()
    }

    /// Advance to the next page; false once the range is drained
    pub async fn move_next(&mut self, trace: &Trace) -> bool {
        if !self.has_more_results {
            return false;
        }
        let result = self.advance(trace).await;
        self.current = Some(result);
        true
    }

    /// Buffer the next page so a later `move_next` returns it without I/O
    pub async fn prefetch_page(&mut self, trace: &Trace) {
        if !self.has_more_results || self.prefetched.is_some() {
            return;
        }
        let result = self.fetch_page(trace).await;
        trace.metrics().increment_prefetches();
        self.prefetched = Some(result);
    }

    async fn advance(&mut self, trace: &Trace) -> QueryPageResult {
        let result = match self.prefetched.take() {
            Some(result) => result,
            None => self.fetch_page(trace).await,
        };
        if let Ok(page) = &result {
            self.feed_range_state.state = page.state.clone();
            self.has_more_results = page.state.is_some();
            if !self.has_more_results {
                tracing::trace!(
                    event = %PipelineEvent::RangeDrained,
                    range = %self.feed_range_state.feed_range,
                    "range drained"
                );
            }
        }
        result
    }

    async fn fetch_page(&self, trace: &Trace) -> QueryPageResult {
        if self.cancellation.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        let range = &self.feed_range_state.feed_range;
        let fetch_trace = trace.start_child(format!("Query {}", range));
        let result = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(QueryError::Cancelled),
            result = self.container.monadic_query(
                &self.query,
                &self.feed_range_state,
                &self.options,
                &fetch_trace,
                &self.cancellation,
            ) => result,
        };

        match &result {
            Ok(page) => {
                fetch_trace.add_datum("requestCharge", page.request_charge);
                fetch_trace.add_datum("activityId", page.activity_id.clone());
                fetch_trace
                    .metrics()
                    .record_page(page.documents.len(), page.request_charge);
                tracing::trace!(
                    event = %PipelineEvent::RangeFetch,
                    range = %range,
                    documents = page.documents.len(),
                    request_charge = page.request_charge,
                    "page received"
                );
            }
            Err(error) => {
                fetch_trace.add_datum("error", error.code());
                fetch_trace.metrics().increment_fetch_failures();
                tracing::debug!(
                    event = %PipelineEvent::RangeFetch,
                    range = %range,
                    code = error.code(),
                    "fetch failed: {}",
                    error
                );
            }
        }
        result
    }
}

impl RangeCursor for PartitionRangePageEnumerator {
    fn feed_range(&self) -> &FeedRange {
        &self.feed_range_state.feed_range
    }

    fn needs_fetch(&self) -> bool {
        self.has_more_results
    }

    fn is_exhausted(&self) -> bool {
        !self.has_more_results && self.prefetched.is_none()
    }

    fn prefetch<'a>(&'a mut self, trace: &'a Trace) -> BoxFuture<'a, ()> {
        self.prefetch_page(trace).boxed()
    }

    fn fetch<'a>(&'a mut self, trace: &'a Trace) -> BoxFuture<'a, QueryPageResult> {
        self.advance(trace).boxed()
    }

    /// Children continue from the parent's state; the backend scopes a
    /// continuation to whichever range it is sent with.
    fn split(&self, children: &[FeedRange]) -> Vec<Self> {
        children
            .iter()
            .map(|child| {
                self.with_feed_range_state(FeedRangeState::new(
                    child.clone(),
                    self.feed_range_state.state.clone(),
                ))
            })
            .collect()
    }

    /// A merged range restarts from its beginning. Rows the merged cursors
    /// already delivered may be delivered again.
    fn merge(gone: Self, _siblings: Vec<Self>, covering: FeedRange) -> Self {
        gone.with_feed_range_state(FeedRangeState::unstarted(covering))
    }
}
