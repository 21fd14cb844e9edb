//! crossquery - cross-partition query execution for partitioned document stores
//!
//! A query fans out over the feed ranges of a container, client-side
//! operators (ORDER BY merge, aggregates, DISTINCT, GROUP BY, OFFSET/LIMIT,
//! hybrid search rank fusion) combine the per-range pages, and every page
//! carries a continuation that resumes the whole chain, across range
//! splits and merges.

pub mod config;
pub mod errors;
pub mod observability;
pub mod pagination;
pub mod pipeline;
pub mod query;

pub use config::QueryPipelineConfig;
pub use errors::{QueryError, QueryResult};
pub use pagination::{FeedRange, InMemoryContainer, QueryBehavior, QueryPage};
pub use pipeline::{ContinuationToken, FeedResponse, PipelineFactory, QueryIterator, QueryPipelineStage};
pub use query::{QueryInfo, SortOrder, SqlQuerySpec};
