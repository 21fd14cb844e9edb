//! Pipeline assembly
//!
//! The chain is built inside-out from a compiled plan. Each layer is a
//! creator closure that receives the part of the continuation meant for it,
//! strips its own token and hands the nested `source` token to the creator
//! below. A token whose nesting does not match the assembled layers fails
//! with `MalformedContinuationToken` before any backend call is made.
//!
//! Layers, innermost first:
//! 1. source: Parallel, streaming OrderBy or NonStreamingOrderBy
//! 2. Aggregate (aggregates without GROUP BY)
//! 3. Distinct
//! 4. GroupBy
//! 5. Skip (OFFSET), Take (LIMIT), Take (TOP)
//! 6. DCount
//! 7. SkipEmptyPage, CatchAll
//!
//! A hybrid search plan replaces layers 1 to 6 with the hybrid search
//! stage under its own Skip and Take.

use super::aggregate::AggregateStage;
use super::catch_all::CatchAllStage;
use super::context::CrossPartitionContext;
use super::dcount::DCountStage;
use super::distinct::DistinctStage;
use super::group_by::GroupByStage;
use super::hybrid_search::{HybridSearchStage, HYBRID_SEARCH_DISALLOW_MESSAGE};
use super::order_by::{NonStreamingOrderByStage, OrderByCrossPartitionStage};
use super::parallel::ParallelCrossPartitionStage;
use super::skip::SkipStage;
use super::skip_empty_page::SkipEmptyPageStage;
use super::stage::QueryPipelineStage;
use super::take::{TakeKind, TakeStage};
use super::token::ContinuationToken;
use crate::errors::{QueryError, QueryResult};
use crate::query::{DistinctQueryType, HybridSearchQueryInfo, QueryInfo};

type StageCreator<'a> =
    Box<dyn FnOnce(Option<ContinuationToken>) -> QueryResult<QueryPipelineStage> + 'a>;

pub struct PipelineFactory;

impl PipelineFactory {
    pub fn monadic_create(
        context: &CrossPartitionContext,
        query_info: &QueryInfo,
        continuation: Option<ContinuationToken>,
    ) -> QueryResult<QueryPipelineStage> {
        query_info.validate()?;
        let cancellation = context.cancellation.clone();

        if let Some(hybrid) = &query_info.hybrid_search_query_info {
            if continuation.is_some() {
                return Err(QueryError::invalid_argument(HYBRID_SEARCH_DISALLOW_MESSAGE));
            }
            let stage = Self::hybrid_search_chain(context, hybrid)?;
            return Ok(CatchAllStage::new(SkipEmptyPageStage::new(stage, cancellation)));
        }

        let mut create: StageCreator<'_> = if !query_info.has_order_by() {
            Box::new(move |token| ParallelCrossPartitionStage::monadic_create(context, token))
        } else if query_info.has_non_streaming_order_by {
            Box::new(move |token| {
                NonStreamingOrderByStage::monadic_create(context, query_info.order_by.clone(), token)
            })
        } else {
            Box::new(move |token| {
                OrderByCrossPartitionStage::monadic_create(
                    context,
                    query_info.order_by.clone(),
                    query_info.order_by_expressions.clone(),
                    token,
                )
            })
        };

        if query_info.has_aggregates() && !query_info.has_group_by() {
            let inner = create;
            let cancellation = cancellation.clone();
            create = Box::new(move |token| AggregateStage::monadic_create(query_info, token, cancellation, inner));
        }

        if query_info.has_distinct() || query_info.has_dcount() {
            // A DCOUNT plan always counts unique rows
            let distinct_type = match query_info.distinct_type {
                DistinctQueryType::None => DistinctQueryType::Unordered,
                other => other,
            };
            let inner = create;
            let cancellation = cancellation.clone();
            create = Box::new(move |token| DistinctStage::monadic_create(distinct_type, token, cancellation, inner));
        }

        if query_info.has_group_by() {
            let inner = create;
            let cancellation = cancellation.clone();
            let page_size = context.page_size;
            create = Box::new(move |token| {
                GroupByStage::monadic_create(query_info, page_size, token, cancellation, inner)
            });
        }

        if let Some(offset) = query_info.offset {
            let inner = create;
            let cancellation = cancellation.clone();
            create = Box::new(move |token| SkipStage::monadic_create(offset, token, cancellation, inner));
        }

        if let Some(limit) = query_info.limit {
            let inner = create;
            let cancellation = cancellation.clone();
            create = Box::new(move |token| {
                TakeStage::monadic_create(TakeKind::Limit, limit, token, cancellation, inner)
            });
        }

        if let Some(top) = query_info.top {
            let inner = create;
            let cancellation = cancellation.clone();
            create = Box::new(move |token| TakeStage::monadic_create(TakeKind::Top, top, token, cancellation, inner));
        }

        if let Some(info) = &query_info.d_count_info {
            let inner = create;
            let cancellation = cancellation.clone();
            let info = info.clone();
            create = Box::new(move |token| DCountStage::monadic_create(info, token, cancellation, inner));
        }

        let stage = create(continuation)?;
        Ok(CatchAllStage::new(SkipEmptyPageStage::new(stage, cancellation)))
    }

    fn hybrid_search_chain(
        context: &CrossPartitionContext,
        hybrid: &HybridSearchQueryInfo,
    ) -> QueryResult<QueryPipelineStage> {
        let cancellation = context.cancellation.clone();
        let mut create: StageCreator<'_> =
            Box::new(move |token| HybridSearchStage::monadic_create(context, hybrid, token));

        if let Some(skip) = hybrid.skip {
            let inner = create;
            let cancellation = cancellation.clone();
            create = Box::new(move |token| SkipStage::monadic_create(skip, token, cancellation, inner));
        }

        if let Some(take) = hybrid.take {
            let inner = create;
            let cancellation = cancellation.clone();
            create = Box::new(move |token| TakeStage::monadic_create(TakeKind::Top, take, token, cancellation, inner));
        }

        create(None)
    }
}
