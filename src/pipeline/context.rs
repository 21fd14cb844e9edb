//! Everything a cross-partition source stage needs to start fanning out

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::pagination::{DocumentContainer, FeedRange, PrefetchPolicy, QueryPaginationOptions};
use crate::query::SqlQuerySpec;

#[derive(Clone)]
pub struct CrossPartitionContext {
    pub container: Arc<dyn DocumentContainer>,
    /// Query sent to every range
    pub query: SqlQuerySpec,
    /// Ranges the query must visit, sorted and disjoint
    pub target_ranges: Vec<FeedRange>,
    /// Backend paging options
    pub options: QueryPaginationOptions,
    /// Rows per page emitted by client-side stages
    pub page_size: usize,
    pub max_concurrency: i32,
    pub prefetch_policy: PrefetchPolicy,
    /// Order-by sources emit whole backend rows instead of their payloads
    pub emit_raw_order_by_payload: bool,
    pub cancellation: CancellationToken,
}

impl CrossPartitionContext {
    pub fn new(
        container: Arc<dyn DocumentContainer>,
        query: SqlQuerySpec,
        target_ranges: Vec<FeedRange>,
        page_size: usize,
        cancellation: CancellationToken,
    ) -> Self {
        let mut target_ranges = target_ranges;
        target_ranges.sort();
        Self {
            container,
            query,
            target_ranges,
            options: QueryPaginationOptions::with_page_size(page_size),
            page_size,
            max_concurrency: 0,
            prefetch_policy: PrefetchPolicy::default(),
            emit_raw_order_by_payload: false,
            cancellation,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: i32) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_prefetch_policy(mut self, prefetch_policy: PrefetchPolicy) -> Self {
        self.prefetch_policy = prefetch_policy;
        self
    }

    pub fn with_raw_order_by_payload(mut self, emit_raw: bool) -> Self {
        self.emit_raw_order_by_payload = emit_raw;
        self
    }

    /// Rows requested from each range per backend page
    pub fn with_backend_page_size(mut self, page_size: usize) -> Self {
        self.options.page_size_hint = Some(page_size);
        self
    }
}
