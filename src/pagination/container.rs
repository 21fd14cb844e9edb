//! Capabilities the pipeline consumes from the document container
//!
//! Implementations must be safe for concurrent calls: up to
//! `max_concurrency` fetches may be in flight at once.

use std::collections::BTreeMap;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::feed_range::FeedRange;
use super::page::QueryPage;
use super::state::FeedRangeState;
use crate::errors::QueryResult;
use crate::observability::Trace;
use crate::query::SqlQuerySpec;

/// Per-request paging options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPaginationOptions {
    /// Maximum rows per backend page
    pub page_size_hint: Option<usize>,
    pub additional_headers: BTreeMap<String, String>,
}

impl QueryPaginationOptions {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size_hint: Some(page_size),
            additional_headers: BTreeMap::new(),
        }
    }
}

/// Issues one query request against one range
pub trait QueryDataSource: Send + Sync {
    /// Fetch the page that follows `feed_range_state`
    ///
    /// A range that no longer maps onto the physical layout fails with
    /// `QueryError::PartitionGone`.
    fn monadic_query<'a>(
        &'a self,
        query: &'a SqlQuerySpec,
        feed_range_state: &'a FeedRangeState,
        options: &'a QueryPaginationOptions,
        trace: &'a Trace,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, QueryResult<QueryPage>>;
}

/// Resolves the range topology
pub trait FeedRangeProvider: Send + Sync {
    /// Every current range, sorted
    fn get_feed_ranges<'a>(
        &'a self,
        trace: &'a Trace,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, QueryResult<Vec<FeedRange>>>;

    /// Current ranges overlapping `range`, sorted
    ///
    /// After a split these are the children; after a merge it is the single
    /// covering range.
    fn get_child_ranges<'a>(
        &'a self,
        range: &'a FeedRange,
        trace: &'a Trace,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, QueryResult<Vec<FeedRange>>>;

    /// Drop any cached topology
    fn refresh_provider<'a>(
        &'a self,
        trace: &'a Trace,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, QueryResult<()>>;
}

/// A queryable container with range topology
pub trait DocumentContainer: QueryDataSource + FeedRangeProvider {}

impl<T: QueryDataSource + FeedRangeProvider> DocumentContainer for T {}
