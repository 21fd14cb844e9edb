//! Non-streaming order-by: drain every range, sort once, page the result
//!
//! Used when the backend cannot return rows pre-sorted per range. The
//! continuation is the number of rows already handed out; resuming drains
//! and sorts again, then skips that many.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::comparer::compare_rows;
use super::row::OrderByRow;
use super::token::NonStreamingOrderByContinuationToken;
use crate::errors::{QueryError, QueryResult};
use crate::observability::Trace;
use crate::pagination::{
    new_activity_id, CrossPartitionRangePageEnumerator, CursorComparer, FeedRangeState,
    PartitionRangePageEnumerator, PrefetchPolicy, QueryPage, QueryPageResult, RangeCursor,
};
use crate::pipeline::context::CrossPartitionContext;
use crate::pipeline::stage::QueryPipelineStage;
use crate::pipeline::token::{unexpected_token, ContinuationToken};
use crate::query::SortOrder;

pub struct NonStreamingOrderByStage {
    enumerator: CrossPartitionRangePageEnumerator<PartitionRangePageEnumerator>,
    orders: Vec<SortOrder>,
    page_size: usize,
    emit_raw: bool,
    drained: Vec<OrderByRow>,
    pending_charge: f64,
    sorted: Option<VecDeque<OrderByRow>>,
    emitted: u64,
    returned_final_page: bool,
    cancellation: CancellationToken,
    pub(crate) current: Option<QueryPageResult>,
}

impl NonStreamingOrderByStage {
    pub fn monadic_create(
        context: &CrossPartitionContext,
        orders: Vec<SortOrder>,
        continuation: Option<ContinuationToken>,
    ) -> QueryResult<QueryPipelineStage> {
        if orders.is_empty() {
            return Err(QueryError::invalid_argument("order-by stage needs at least one sort column"));
        }
        let emitted = match continuation {
            None => 0,
            Some(ContinuationToken::NonStreamingOrderBy(token)) => token.emitted,
            Some(other) => return Err(unexpected_token("nonStreamingOrderBy", &other)),
        };

        let cursors = context
            .target_ranges
            .iter()
            .cloned()
            .map(|range| {
                PartitionRangePageEnumerator::new(
                    Arc::clone(&context.container),
                    context.query.clone(),
                    FeedRangeState::unstarted(range),
                    context.options.clone(),
                    context.cancellation.clone(),
                )
            })
            .collect();
        let comparer: CursorComparer<PartitionRangePageEnumerator> =
            Arc::new(|a, b| a.feed_range().cmp(b.feed_range()));
        // Every range is read to the end anyway, so fetch them all at once.
        let enumerator = CrossPartitionRangePageEnumerator::monadic_create(
            Arc::clone(&context.container),
            cursors,
            comparer,
            context.max_concurrency,
            PrefetchPolicy::PrefetchAll,
            context.cancellation.clone(),
        )?;

        Ok(QueryPipelineStage::NonStreamingOrderBy(Self {
            enumerator,
            orders,
            page_size: context.page_size.max(1),
            emit_raw: context.emit_raw_order_by_payload,
            drained: Vec::new(),
            pending_charge: 0.0,
            sorted: None,
            emitted,
            returned_final_page: false,
            cancellation: context.cancellation.clone(),
            current: None,
        }))
    }

    /// Pull every remaining backend page; rows gathered so far survive a
    /// failure so the next call continues the drain.
    async fn drain(&mut self, trace: &Trace) -> QueryResult<()> {
        while self.enumerator.move_next(trace).await {
            let page = self
                .enumerator
                .take_current()
                .unwrap_or_else(|| Err(QueryError::internal("enumerator advanced without a page")))?;
            self.pending_charge += page.request_charge;
            for document in page.documents {
                self.drained.push(OrderByRow::parse(document)?);
            }
        }

        let mut rows = std::mem::take(&mut self.drained);
        let orders = &self.orders;
        rows.sort_by(|a, b| compare_rows(a, b, orders));
        let skip = (self.emitted as usize).min(rows.len());
        self.sorted = Some(rows.into_iter().skip(skip).collect());
        Ok(())
    }

    pub(crate) async fn move_next(&mut self, trace: &Trace) -> bool {
        if self.cancellation.is_cancelled() {
            self.current = Some(Err(QueryError::Cancelled));
            return true;
        }
        if self.returned_final_page {
            self.current = None;
            return false;
        }
        if self.sorted.is_none() {
            if let Err(error) = self.drain(trace).await {
                self.current = Some(Err(error));
                return true;
            }
        }
        let sorted = match self.sorted.as_mut() {
            Some(sorted) => sorted,
            None => {
                self.current = Some(Err(QueryError::internal("sorted rows missing after drain")));
                return true;
            }
        };

        let take = self.page_size.min(sorted.len());
        let rows = sorted.drain(..take);
        let documents: Vec<_> = if self.emit_raw {
            rows.map(|row| row.to_document()).collect()
        } else {
            rows.filter_map(|row| row.payload).collect()
        };
        self.emitted += take as u64;
        let state = if sorted.is_empty() {
            self.returned_final_page = true;
            None
        } else {
            Some(
                ContinuationToken::NonStreamingOrderBy(NonStreamingOrderByContinuationToken {
                    emitted: self.emitted,
                })
                .to_state(),
            )
        };
        let charge = std::mem::take(&mut self.pending_charge);
        self.current = Some(Ok(QueryPage::new(documents, charge, new_activity_id(), state)));
        true
    }

    pub(crate) fn dispose(&mut self) {
        self.enumerator.dispose();
        self.drained.clear();
        self.sorted = None;
        self.current = None;
    }
}
