//! Query pipeline
//!
//! Client-side operators over the cross-partition enumerators, the
//! continuation token they share and the factory that assembles them.
//!
//! # Usage
//!
//! ```ignore
//! use crossquery::pipeline::QueryIterator;
//!
//! let mut iterator = QueryIterator::create(
//!     container, query, query_info, None, &config, None, cancellation,
//! ).await?;
//! while let Some(page) = iterator.next_page().await {
//!     let page = page?;
//!     // hand page.documents and page.continuation to the caller
//! }
//! ```

pub mod aggregate;
mod catch_all;
mod context;
mod dcount;
pub mod distinct;
mod factory;
mod group_by;
mod hybrid_search;
mod iterator;
pub mod order_by;
mod parallel;
mod skip;
mod skip_empty_page;
mod stage;
mod take;
#[cfg(test)]
mod test_support;
mod token;

pub use aggregate::{AggregateContinuationToken, AggregateStage};
pub use catch_all::CatchAllStage;
pub use context::CrossPartitionContext;
pub use dcount::{DCountContinuationToken, DCountStage};
pub use distinct::{DistinctContinuationToken, DistinctStage};
pub use factory::PipelineFactory;
pub use group_by::{GroupByContinuationToken, GroupByStage};
pub use hybrid_search::{
    fuse_ranks, HybridSearchContinuationToken, HybridSearchResult, HybridSearchStage,
    HYBRID_SEARCH_DISALLOW_MESSAGE,
};
pub use iterator::{FeedResponse, QueryIterator};
pub use order_by::{NonStreamingOrderByStage, OrderByCrossPartitionStage};
pub use parallel::{ParallelContinuationToken, ParallelCrossPartitionStage};
pub use skip::{SkipContinuationToken, SkipStage};
pub use skip_empty_page::SkipEmptyPageStage;
pub use stage::{EmptyStage, QueryPipelineStage};
pub use take::{TakeContinuationToken, TakeKind, TakeStage};
pub use token::{ContinuationToken, TOKEN_VERSION};
