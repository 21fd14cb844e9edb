//! Query inputs: the text sent to each range and the compiled plan that
//! decides which client-side stages run.

mod hybrid_search_info;
mod query_info;
mod sql_query_spec;

pub use hybrid_search_info::{
    FullTextStatistics, GlobalFullTextSearchStatistics, HybridSearchQueryInfo,
    TOTAL_DOCUMENT_COUNT_PLACEHOLDER,
};
pub use query_info::{
    AggregateOperator, DCountInfo, DistinctQueryType, QueryInfo, SortOrder,
};
pub use sql_query_spec::{SqlParameter, SqlQuerySpec, ORDER_BY_FILTER_PLACEHOLDER};
