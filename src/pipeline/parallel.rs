//! Parallel cross-partition stage
//!
//! Union of all ranges with no ordering across ranges. Ranges are drained
//! lowest first; each backend page becomes one outer page, rows unchanged.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::context::CrossPartitionContext;
use super::stage::QueryPipelineStage;
use super::token::{unexpected_token, ContinuationToken};
use crate::errors::{QueryError, QueryResult};
use crate::observability::Trace;
use crate::pagination::{
    CrossPartitionRangePageEnumerator, CursorComparer, FeedRange, FeedRangeState,
    PartitionRangePageEnumerator, QueryPage, QueryPageResult, QueryState, RangeCursor,
};

/// One entry per range with work left; an absent range is exhausted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelContinuationToken {
    pub ranges: Vec<FeedRangeState>,
}

/// Check that resumed ranges are non-empty, pairwise disjoint and inside
/// the union of the target ranges.
pub(crate) fn validate_resume_ranges(targets: &[FeedRange], ranges: &[&FeedRange]) -> QueryResult<()> {
    if ranges.is_empty() {
        return Err(QueryError::malformed("continuation lists no ranges"));
    }
    let mut sorted: Vec<&FeedRange> = ranges.to_vec();
    sorted.sort();
    for pair in sorted.windows(2) {
        if pair[0].overlaps(pair[1]) {
            return Err(QueryError::malformed(format!(
                "continuation ranges {} and {} overlap",
                pair[0], pair[1]
            )));
        }
    }
    for range in sorted {
        if range.is_empty() {
            return Err(QueryError::malformed(format!("empty range {}", range)));
        }
        let mut covering: Vec<&FeedRange> = targets.iter().filter(|t| t.overlaps(range)).collect();
        covering.sort();
        let covered = match (covering.first(), covering.last()) {
            (Some(first), Some(last)) => {
                first.min <= range.min
                    && last.max >= range.max
                    && covering.windows(2).all(|pair| pair[0].max == pair[1].min)
            }
            _ => false,
        };
        if !covered {
            return Err(QueryError::malformed(format!(
                "continuation range {} is outside the target ranges",
                range
            )));
        }
    }
    Ok(())
}

pub struct ParallelCrossPartitionStage {
    enumerator: CrossPartitionRangePageEnumerator<PartitionRangePageEnumerator>,
    cancellation: CancellationToken,
    pub(crate) current: Option<QueryPageResult>,
}

impl ParallelCrossPartitionStage {
    pub fn monadic_create(
        context: &CrossPartitionContext,
        continuation: Option<ContinuationToken>,
    ) -> QueryResult<QueryPipelineStage> {
        let states = match continuation {
            None => context
                .target_ranges
                .iter()
                .cloned()
                .map(FeedRangeState::unstarted)
                .collect(),
            Some(ContinuationToken::Parallel(token)) => {
                let ranges: Vec<&FeedRange> = token.ranges.iter().map(|s| &s.feed_range).collect();
                validate_resume_ranges(&context.target_ranges, &ranges)?;
                token.ranges
            }
            Some(other) => return Err(unexpected_token("parallel", &other)),
        };

        let cursors = states
            .into_iter()
            .map(|state| {
                PartitionRangePageEnumerator::new(
                    Arc::clone(&context.container),
                    context.query.clone(),
                    state,
                    context.options.clone(),
                    context.cancellation.clone(),
                )
            })
            .collect();
        let comparer: CursorComparer<PartitionRangePageEnumerator> =
            Arc::new(|a, b| a.feed_range().cmp(b.feed_range()));
        let enumerator = CrossPartitionRangePageEnumerator::monadic_create(
            Arc::clone(&context.container),
            cursors,
            comparer,
            context.max_concurrency,
            context.prefetch_policy,
            context.cancellation.clone(),
        )?;

        Ok(QueryPipelineStage::Parallel(Self {
            enumerator,
            cancellation: context.cancellation.clone(),
            current: None,
        }))
    }

    fn continuation(&self) -> Option<QueryState> {
        if self.enumerator.is_empty() {
            return None;
        }
        let mut ranges: Vec<FeedRangeState> = self
            .enumerator
            .cursors()
            .map(|cursor| cursor.feed_range_state().clone())
            .collect();
        ranges.sort_by(|a, b| a.feed_range.cmp(&b.feed_range));
        Some(ContinuationToken::Parallel(ParallelContinuationToken { ranges }).to_state())
    }

    pub(crate) async fn move_next(&mut self, trace: &Trace) -> bool {
        if self.cancellation.is_cancelled() {
            self.current = Some(Err(QueryError::Cancelled));
            return true;
        }
        if !self.enumerator.move_next(trace).await {
            self.current = None;
            return false;
        }
        let result = self
            .enumerator
            .take_current()
            .unwrap_or_else(|| Err(QueryError::internal("enumerator advanced without a page")));
        self.current = Some(match result {
            Ok(page) => Ok(QueryPage {
                state: self.continuation(),
                ..page
            }),
            Err(error) => Err(error),
        });
        true
    }

    pub(crate) fn dispose(&mut self) {
        self.enumerator.dispose();
        self.current = None;
    }
}
