//! The query pipeline stage
//!
//! Every operator is one variant of `QueryPipelineStage`. Stages compose by
//! wrapping: an outer stage owns its inner stage and may pull it zero or
//! more times per `move_next`.
//!
//! Lifecycle: created, then each `move_next` returning true leaves a
//! result in `current`; the first `false` marks permanent exhaustion.
//! `dispose` is idempotent and releases inner stages transitively.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::aggregate::AggregateStage;
use super::catch_all::CatchAllStage;
use super::dcount::DCountStage;
use super::distinct::DistinctStage;
use super::group_by::GroupByStage;
use super::hybrid_search::HybridSearchStage;
use super::order_by::{NonStreamingOrderByStage, OrderByCrossPartitionStage};
use super::parallel::ParallelCrossPartitionStage;
use super::skip::SkipStage;
use super::skip_empty_page::SkipEmptyPageStage;
use super::take::TakeStage;
use crate::errors::QueryError;
use crate::observability::Trace;
use crate::pagination::QueryPageResult;

pub enum QueryPipelineStage {
    Empty(EmptyStage),
    Parallel(ParallelCrossPartitionStage),
    OrderBy(OrderByCrossPartitionStage),
    NonStreamingOrderBy(NonStreamingOrderByStage),
    HybridSearch(HybridSearchStage),
    Aggregate(AggregateStage),
    Distinct(DistinctStage),
    GroupBy(GroupByStage),
    DCount(DCountStage),
    Skip(SkipStage),
    Take(TakeStage),
    SkipEmptyPage(SkipEmptyPageStage),
    CatchAll(CatchAllStage),
}

macro_rules! dispatch {
    ($stage:expr, $inner:ident => $body:expr) => {
        match $stage {
            QueryPipelineStage::Empty($inner) => $body,
            QueryPipelineStage::Parallel($inner) => $body,
            QueryPipelineStage::OrderBy($inner) => $body,
            QueryPipelineStage::NonStreamingOrderBy($inner) => $body,
            QueryPipelineStage::HybridSearch($inner) => $body,
            QueryPipelineStage::Aggregate($inner) => $body,
            QueryPipelineStage::Distinct($inner) => $body,
            QueryPipelineStage::GroupBy($inner) => $body,
            QueryPipelineStage::DCount($inner) => $body,
            QueryPipelineStage::Skip($inner) => $body,
            QueryPipelineStage::Take($inner) => $body,
            QueryPipelineStage::SkipEmptyPage($inner) => $body,
            QueryPipelineStage::CatchAll($inner) => $body,
        }
    };
}

impl QueryPipelineStage {
    pub fn name(&self) -> &'static str {
        match self {
            QueryPipelineStage::Empty(_) => "Empty",
            QueryPipelineStage::Parallel(_) => "Parallel",
            QueryPipelineStage::OrderBy(_) => "OrderBy",
            QueryPipelineStage::NonStreamingOrderBy(_) => "NonStreamingOrderBy",
            QueryPipelineStage::HybridSearch(_) => "HybridSearch",
            QueryPipelineStage::Aggregate(_) => "Aggregate",
            QueryPipelineStage::Distinct(_) => "Distinct",
            QueryPipelineStage::GroupBy(_) => "GroupBy",
            QueryPipelineStage::DCount(_) => "DCount",
            QueryPipelineStage::Skip(_) => "Skip",
            QueryPipelineStage::Take(_) => "Take",
            QueryPipelineStage::SkipEmptyPage(_) => "SkipEmptyPage",
            QueryPipelineStage::CatchAll(_) => "CatchAll",
        }
    }

    /// Result of the last successful `move_next`
    pub fn current(&self) -> Option<&QueryPageResult> {
        dispatch!(self, stage => stage.current.as_ref())
    }

    /// Move the current result out, leaving `None`
    pub fn take_current(&mut self) -> Option<QueryPageResult> {
        dispatch!(self, stage => stage.current.take())
    }

    /// Advance; false exactly when the stage is permanently exhausted
    pub fn move_next<'a>(&'a mut self, trace: &'a Trace) -> BoxFuture<'a, bool> {
        async move { dispatch!(self, stage => stage.move_next(trace).await) }.boxed()
    }

    /// Release resources; safe to call more than once
    pub fn dispose(&mut self) {
        dispatch!(self, stage => stage.dispose())
    }
}

/// Inner result after its `move_next` returned true
pub(crate) fn take_inner_result(inner: &mut QueryPipelineStage) -> QueryPageResult {
    inner.take_current().unwrap_or_else(|| {
        Err(QueryError::internal(format!(
            "{} stage advanced without a result",
            inner.name()
        )))
    })
}

/// Stage that never yields a page
#[derive(Debug, Default)]
pub struct EmptyStage {
    pub(crate) current: Option<QueryPageResult>,
}

impl EmptyStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_stage(self) -> QueryPipelineStage {
        QueryPipelineStage::Empty(self)
    }

    pub(crate) async fn move_next(&mut self, _trace: &Trace) -> bool {
        false
    }

    pub(crate) fn dispose(&mut self) {
        self.current = None;
    }
}
