//! Streaming order-by stage
//!
//! A k-way merge over per-range cursors. Rows are only emitted when no
//! range needs a page, so every emitted row is the global minimum of what
//! is left. Each backend fetch surfaces as a zero-row page carrying its
//! charge; draining pages carry up to `page_size` rows.

use std::cmp::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::comparer::compare_positions;
use super::cursor::{rank_cursors, OrderByPlan, OrderByRangeCursor};
use super::row::OrderByRow;
use super::token::{OrderByCheckpoint, OrderByContinuationToken};
use crate::errors::{QueryError, QueryResult};
use crate::observability::Trace;
use crate::pagination::{
    new_activity_id, CrossPartitionRangePageEnumerator, CursorComparer, FeedRange,
    FeedRangeState, PartitionRangePageEnumerator, QueryPage, QueryPageResult, QueryState,
};
use crate::pipeline::context::CrossPartitionContext;
use crate::pipeline::parallel::validate_resume_ranges;
use crate::pipeline::stage::QueryPipelineStage;
use crate::pipeline::token::{unexpected_token, ContinuationToken};
use crate::query::SortOrder;

pub struct OrderByCrossPartitionStage {
    enumerator: CrossPartitionRangePageEnumerator<OrderByRangeCursor>,
    orders: Vec<SortOrder>,
    page_size: usize,
    last_emitted: Option<OrderByCheckpoint>,
    checkpoint_dirty: bool,
    prefetched: bool,
    returned_final_page: bool,
    cancellation: CancellationToken,
    pub(crate) current: Option<QueryPageResult>,
}

impl OrderByCrossPartitionStage {
    pub fn monadic_create(
        context: &CrossPartitionContext,
        orders: Vec<SortOrder>,
        expressions: Vec<String>,
        continuation: Option<ContinuationToken>,
    ) -> QueryResult<QueryPipelineStage> {
        if orders.is_empty() {
            return Err(QueryError::invalid_argument("order-by stage needs at least one sort column"));
        }
        let plan = Arc::new(OrderByPlan {
            orders: orders.clone(),
            expressions,
            query: context.query.clone(),
        });

        let resumed = match continuation {
            None => context
                .target_ranges
                .iter()
                .cloned()
                .map(|range| (FeedRangeState::unstarted(range), None))
                .collect::<Vec<_>>(),
            Some(ContinuationToken::OrderBy(token)) => {
                let ranges: Vec<&FeedRange> = token.ranges.iter().map(|r| &r.range).collect();
                validate_resume_ranges(&context.target_ranges, &ranges)?;
                for range in &token.ranges {
                    if let Some(checkpoint) = &range.checkpoint {
                        if checkpoint.order_by_items.len() != orders.len() {
                            return Err(QueryError::malformed(format!(
                                "checkpoint for {} has {} sort keys, query has {}",
                                range.range,
                                checkpoint.order_by_items.len(),
                                orders.len()
                            )));
                        }
                    }
                }
                token
                    .ranges
                    .into_iter()
                    .map(|range| (FeedRangeState::new(range.range, range.state), range.checkpoint))
                    .collect()
            }
            Some(other) => return Err(unexpected_token("orderBy", &other)),
        };

        let last_emitted = resumed
            .iter()
            .filter_map(|(_, checkpoint)| checkpoint.as_ref())
            .max_by(|a, b| {
                compare_positions(&a.order_by_items, &a.rid, &b.order_by_items, &b.rid, &orders)
            })
            .cloned();

        let cursors = resumed
            .into_iter()
            .map(|(state, checkpoint)| {
                let enumerator = PartitionRangePageEnumerator::new(
                    Arc::clone(&context.container),
                    plan.query_for(checkpoint.as_ref()),
                    state,
                    context.options.clone(),
                    context.cancellation.clone(),
                );
                let mut cursor = OrderByRangeCursor::new(enumerator, Arc::clone(&plan), checkpoint);
                cursor.set_global(last_emitted.clone());
                cursor
            })
            .collect();

        let comparer: CursorComparer<OrderByRangeCursor> = Arc::new(rank_cursors);
        let enumerator = CrossPartitionRangePageEnumerator::monadic_create(
            Arc::clone(&context.container),
            cursors,
            comparer,
            context.max_concurrency,
            context.prefetch_policy,
            context.cancellation.clone(),
        )?;

        Ok(QueryPipelineStage::OrderBy(Self {
            enumerator,
            orders,
            page_size: context.page_size.max(1),
            last_emitted,
            checkpoint_dirty: false,
            prefetched: false,
            returned_final_page: false,
            cancellation: context.cancellation.clone(),
            current: None,
        }))
    }

    fn continuation(&self) -> Option<QueryState> {
        if self.enumerator.is_empty() {
            return None;
        }
        let mut ranges: Vec<_> = self
            .enumerator
            .cursors()
            .map(OrderByRangeCursor::resume_token)
            .collect();
        ranges.sort_by(|a, b| a.range.cmp(&b.range));
        Some(ContinuationToken::OrderBy(OrderByContinuationToken { ranges }).to_state())
    }

    fn record_emitted(&mut self, row: &OrderByRow) {
        let same_position = self.last_emitted.as_ref().map(|checkpoint| {
            compare_positions(
                &checkpoint.order_by_items,
                &checkpoint.rid,
                &row.order_by_items,
                &row.rid,
                &self.orders,
            ) == Ordering::Equal
        });
        match self.last_emitted.as_mut() {
            Some(checkpoint) if same_position == Some(true) => checkpoint.skip_count += 1,
            _ => {
                self.last_emitted = Some(OrderByCheckpoint::new(row.order_by_items.clone(), row.rid.clone()))
            }
        }
        self.checkpoint_dirty = true;
    }

    fn push_checkpoint(&mut self) {
        if !self.checkpoint_dirty {
            return;
        }
        let checkpoint = self.last_emitted.clone();
        self.enumerator
            .update_cursors(|cursor| cursor.set_global(checkpoint.clone()));
        self.checkpoint_dirty = false;
    }

    fn finish_page(&mut self, mut page: QueryPage) {
        // Rows handed out from buffers must be behind every cursor's token.
        self.push_checkpoint();
        page.state = self.continuation();
        if page.state.is_none() {
            self.returned_final_page = true;
        }
        self.current = Some(Ok(page));
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
        if !self.prefetched {
            self.prefetched = true;
            self.enumerator.prefetch_pending(trace).await;
        }

        if self.enumerator.needs_fetch() {
            self.push_checkpoint();
            if self.enumerator.move_next(trace).await {
                match self.enumerator.take_current() {
                    Some(Ok(page)) => self.finish_page(page),
                    Some(Err(error)) => self.current = Some(Err(error)),
                    None => {
                        self.current = Some(Err(QueryError::internal("enumerator advanced without a page")))
                    }
                }
                return true;
            }
        }

        let mut documents = Vec::new();
        let mut consumed = 0;
        while consumed < self.page_size {
            let row = match self.enumerator.with_best(OrderByRangeCursor::pop_row) {
                Some(row) => row,
                None => break,
            };
            consumed += 1;
            self.record_emitted(&row);
            // Rows whose projection is undefined take part in the order
            // but produce no result.
            if let Some(payload) = row.payload {
                documents.push(payload);
            }
        }
        self.finish_page(QueryPage::new(documents, 0.0, new_activity_id(), None));
        true
    }

    pub(crate) fn dispose(&mut self) {
        self.enumerator.dispose();
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    use crate::pagination::{InMemoryContainer, QueryBehavior};
    use crate::pipeline::order_by::OrderByItem;
    use crate::pipeline::test_support::{context_for, drain_pages, rows};

    fn values(documents: &[Value]) -> Vec<i64> {
        documents.iter().map(|doc| doc["v"].as_i64().unwrap()).collect()
    }

    /// A page served from a half-consumed buffer must not replay its rows.
    #[tokio::test]
    async fn test_buffered_page_token_is_past_emitted_rows() {
        let container = Arc::new(
            InMemoryContainer::new(1).with_behavior(QueryBehavior::order_by(&[("v", SortOrder::Ascending)])),
        );
        for v in 0..5 {
            container.insert(&format!("k{}", v), json!({ "v": v }));
        }
        let context = context_for(&container, 2).with_backend_page_size(10);
        let create = |token: Option<ContinuationToken>| {
            OrderByCrossPartitionStage::monadic_create(
                &context,
                vec![SortOrder::Ascending],
                vec!["c.v".to_string()],
                token,
            )
        };

        let mut stage = create(None).unwrap();
        let trace = Trace::root("test");
        assert!(stage.move_next(&trace).await);
        assert!(stage.take_current().unwrap().unwrap().documents.is_empty());
        assert!(stage.move_next(&trace).await);
        let page = stage.take_current().unwrap().unwrap();
        assert_eq!(values(&page.documents), vec![0, 1]);

        let token = ContinuationToken::from_state(page.state.as_ref().unwrap()).unwrap();
        match &token {
            ContinuationToken::OrderBy(token) => {
                let checkpoint = token.ranges[0].checkpoint.as_ref().unwrap();
                assert_eq!(checkpoint.order_by_items, vec![OrderByItem::new(json!(1))]);
            }
            other => panic!("unexpected token {:?}", other),
        }

        let mut resumed = create(Some(token)).unwrap();
        assert_eq!(values(&rows(&drain_pages(&mut resumed).await)), vec![2, 3, 4]);
    }
}
