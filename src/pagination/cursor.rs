//! The per-range cursor seam of the cross-partition enumerator

use futures_util::future::BoxFuture;

use super::feed_range::FeedRange;
use super::page::QueryPageResult;
use crate::observability::Trace;

/// Something that walks one feed range and can be re-homed onto new
/// ranges after a split or merge.
pub trait RangeCursor: Send + Sized {
    fn feed_range(&self) -> &FeedRange;

    /// True when the consumer cannot make progress on this range without
    /// another backend page.
    fn needs_fetch(&self) -> bool;

    /// True once the range is drained and nothing is left buffered
    fn is_exhausted(&self) -> bool;

    /// Buffer the next page without consuming it
    fn prefetch<'a>(&'a mut self, trace: &'a Trace) -> BoxFuture<'a, ()>;

    /// Consume the next page (buffered or fetched) and advance the range state.
    /// On failure the state is left where it was.
    fn fetch<'a>(&'a mut self, trace: &'a Trace) -> BoxFuture<'a, QueryPageResult>;

    /// Cursors for the children of a split range, resuming where this one is
    fn split(&self, children: &[FeedRange]) -> Vec<Self>;

    /// One cursor over `covering` replacing the gone cursor and every
    /// sibling cursor whose range `covering` absorbed
    fn merge(gone: Self, siblings: Vec<Self>, covering: FeedRange) -> Self;
}
