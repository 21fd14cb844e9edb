//! Pagination layer
//!
//! Page and state primitives, the capabilities consumed from the document
//! container, and the enumerators that walk one or many feed ranges.
//!
//! Dependency order, leaves first:
//! 1. `FeedRange`, `QueryState`, `FeedRangeState`, `QueryPage`
//! 2. `PartitionRangePageEnumerator` (one range)
//! 3. `CrossPartitionRangePageEnumerator` (many ranges, split/merge repair)

mod container;
mod cross_partition;
mod cursor;
mod feed_range;
pub mod in_memory;
mod page;
mod partition_range;
mod prefetch;
mod resource_id;
mod state;

pub use container::{DocumentContainer, FeedRangeProvider, QueryDataSource, QueryPaginationOptions};
pub use cross_partition::{CrossPartitionRangePageEnumerator, CursorComparer};
pub use cursor::RangeCursor;
pub use feed_range::{FeedRange, MAX_EPK, MIN_EPK};
pub use in_memory::{InMemoryContainer, QueryBehavior};
pub use page::{new_activity_id, QueryExecutionInfo, QueryPage, QueryPageResult};
pub use partition_range::PartitionRangePageEnumerator;
pub use prefetch::PrefetchPolicy;
pub use resource_id::{compare_rids, ResourceId};
pub use state::{FeedRangeState, QueryState};
