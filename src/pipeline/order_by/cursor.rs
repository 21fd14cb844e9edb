//! Order-by range cursor
//!
//! Buffers the parsed rows of one backend page so the streaming stage can
//! merge range heads. A resume checkpoint drops every row at or before the
//! last emitted position, which keeps delivery exactly-once across
//! continuation, split and merge.
//!
//! The stage pushes its last emitted position into every cursor before a
//! fetch; split children and merged cursors resume from it.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::comparer::{compare_positions, compare_rows};
use super::filter::{order_by_filter, ALWAYS_TRUE};
use super::row::OrderByRow;
use super::token::{OrderByCheckpoint, OrderByRangeToken};
use crate::errors::QueryResult;
use crate::observability::Trace;
use crate::pagination::{
    FeedRange, FeedRangeState, PartitionRangePageEnumerator, QueryPage, QueryPageResult,
    QueryState, RangeCursor,
};
use crate::query::{SortOrder, SqlQuerySpec};

/// Shape shared by every cursor of one order-by query
#[derive(Debug, Clone)]
pub(crate) struct OrderByPlan {
    pub(crate) orders: Vec<SortOrder>,
    pub(crate) expressions: Vec<String>,
    /// Query text with the filter placeholder still in place
    pub(crate) query: SqlQuerySpec,
}

impl OrderByPlan {
    fn filter_text(&self, checkpoint: Option<&OrderByCheckpoint>) -> String {
        match checkpoint {
            Some(checkpoint) => order_by_filter(&self.expressions, &self.orders, &checkpoint.order_by_items),
            None => ALWAYS_TRUE.to_string(),
        }
    }

    pub(crate) fn query_for(&self, checkpoint: Option<&OrderByCheckpoint>) -> SqlQuerySpec {
        self.query.with_order_by_filter(&self.filter_text(checkpoint))
    }
}

pub(crate) struct OrderByRangeCursor {
    enumerator: PartitionRangePageEnumerator,
    plan: Arc<OrderByPlan>,
    buffer: VecDeque<OrderByRow>,
    /// State the buffered page was requested with
    page_start_state: Option<QueryState>,
    resume_filter: Option<OrderByCheckpoint>,
    skipped_equal: u64,
    global: Option<OrderByCheckpoint>,
}

impl OrderByRangeCursor {
    pub(crate) fn new(
        enumerator: PartitionRangePageEnumerator,
        plan: Arc<OrderByPlan>,
        resume_filter: Option<OrderByCheckpoint>,
    ) -> Self {
        Self {
            page_start_state: enumerator.state().cloned(),
            enumerator,
            plan,
            buffer: VecDeque::new(),
            global: resume_filter.clone(),
            resume_filter,
            skipped_equal: 0,
        }
    }

    /// Cursor over `feed_range_state` filtered by `checkpoint`
    fn rehome(&self, feed_range_state: FeedRangeState, checkpoint: Option<OrderByCheckpoint>) -> Self {
        let query = self.plan.query_for(checkpoint.as_ref());
        let enumerator = self.enumerator.with_query(query, feed_range_state);
        Self::new(enumerator, Arc::clone(&self.plan), checkpoint)
    }

    pub(crate) fn head(&self) -> Option<&OrderByRow> {
        self.buffer.front()
    }

    pub(crate) fn pop_row(&mut self) -> Option<OrderByRow> {
        self.buffer.pop_front()
    }

    pub(crate) fn set_global(&mut self, checkpoint: Option<OrderByCheckpoint>) {
        self.global = checkpoint;
    }

    fn effective_checkpoint(&self) -> Option<OrderByCheckpoint> {
        self.global.clone().or_else(|| self.resume_filter.clone())
    }

    /// Backend state that reproduces every row not yet emitted
    fn resume_state(&self) -> Option<QueryState> {
        if self.buffer.is_empty() {
            self.enumerator.state().cloned()
        } else {
            self.page_start_state.clone()
        }
    }

    pub(crate) fn resume_token(&self) -> OrderByRangeToken {
        let checkpoint = self.effective_checkpoint();
        OrderByRangeToken {
            range: self.feed_range().clone(),
            state: self.resume_state(),
            filter: self.plan.filter_text(checkpoint.as_ref()),
            checkpoint,
        }
    }

    /// Drop rows at or before the resume checkpoint
    fn admit(&mut self, row: &OrderByRow) -> bool {
        let checkpoint = match &self.resume_filter {
            Some(checkpoint) => checkpoint,
            None => return true,
        };
        let position = compare_positions(
            &row.order_by_items,
            &row.rid,
            &checkpoint.order_by_items,
            &checkpoint.rid,
            &self.plan.orders,
        );
        match position {
            Ordering::Less => false,
            Ordering::Equal if self.skipped_equal < checkpoint.skip_count => {
                self.skipped_equal += 1;
                false
            }
            _ => {
                // Rows arrive sorted, nothing after this one can be filtered.
                self.resume_filter = None;
                self.skipped_equal = 0;
                true
            }
        }
    }

    async fn fetch_rows(&mut self, trace: &Trace) -> QueryPageResult {
        let start = self.enumerator.state().cloned();
        let page = self.enumerator.fetch(trace).await?;
        let parsed: QueryResult<Vec<OrderByRow>> =
            page.documents.iter().cloned().map(OrderByRow::parse).collect();
        let rows = match parsed {
            Ok(rows) => rows,
            Err(error) => {
                // Nothing from this page was buffered; fetch it again next time.
                self.enumerator.rewind(start);
                return Err(error);
            }
        };
        for row in rows {
            if self.admit(&row) {
                self.buffer.push_back(row);
            }
        }
        self.page_start_state = start;
        Ok(QueryPage {
            documents: Vec::new(),
            ..page
        })
    }
}

/// Rank cursors for the k-way merge: cursors needing a page first, then by
/// head row, then by range.
pub(crate) fn rank_cursors(left: &OrderByRangeCursor, right: &OrderByRangeCursor) -> Ordering {
    let by_head = match (left.head(), right.head()) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(l), Some(r)) => compare_rows(l, r, &left.plan.orders),
    };
    by_head.then_with(|| left.feed_range().cmp(right.feed_range()))
}

impl RangeCursor for OrderByRangeCursor {
    fn feed_range(&self) -> &FeedRange {
        self.enumerator.feed_range()
    }

    fn needs_fetch(&self) -> bool {
        self.buffer.is_empty() && self.enumerator.has_more_results()
    }

    fn is_exhausted(&self) -> bool {
        self.buffer.is_empty() && self.enumerator.is_exhausted()
    }

    fn prefetch<'a>(&'a mut self, trace: &'a Trace) -> BoxFuture<'a, ()> {
        self.enumerator.prefetch(trace)
    }

    fn fetch<'a>(&'a mut self, trace: &'a Trace) -> BoxFuture<'a, QueryPageResult> {
        self.fetch_rows(trace).boxed()
    }

    fn split(&self, children: &[FeedRange]) -> Vec<Self> {
        let state = self.resume_state();
        let checkpoint = self.effective_checkpoint();
        children
            .iter()
            .map(|child| self.rehome(FeedRangeState::new(child.clone(), state.clone()), checkpoint.clone()))
            .collect()
    }

    /// The covering range starts over behind the last emitted position, so
    /// rows buffered by the absorbed cursors are fetched again exactly once.
    fn merge(gone: Self, _siblings: Vec<Self>, covering: FeedRange) -> Self {
        let checkpoint = gone.effective_checkpoint();
        gone.rehome(FeedRangeState::unstarted(covering), checkpoint)
    }
}
