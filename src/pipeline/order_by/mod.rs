//! ORDER BY across partitions
//!
//! Two sources: the streaming k-way merge, for backends that return each
//! range pre-sorted, and the non-streaming global sort.

mod comparer;
mod cursor;
mod filter;
mod non_streaming;
mod row;
mod streaming;
mod token;

pub use comparer::{compare_items, compare_positions, compare_rows, compare_values};
pub use filter::{order_by_filter, ALWAYS_TRUE};
pub use non_streaming::NonStreamingOrderByStage;
pub use row::{OrderByItem, OrderByRow};
pub(crate) use row::deserialize_present;
pub use streaming::OrderByCrossPartitionStage;
pub use token::{
    NonStreamingOrderByContinuationToken, OrderByCheckpoint, OrderByContinuationToken,
    OrderByRangeToken,
};
