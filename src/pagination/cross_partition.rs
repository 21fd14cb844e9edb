//! Cross-partition page enumerator
//!
//! Owns the working set of range cursors, always advances the best-ranked
//! one (per a caller-supplied comparer) and repairs the working set when a
//! range is reported gone:
//! - several child ranges: split, one cursor per child
//! - one child equal to the range: stale topology, refresh once then fail
//! - one covering range: merge every working cursor it absorbed
//!
//! The working set is only mutated by the enumerator's own driving calls.

use std::cmp::Ordering;
use std::collections::binary_heap::PeekMut;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::container::DocumentContainer;
use super::cursor::RangeCursor;
use super::feed_range::FeedRange;
use super::page::QueryPageResult;
use super::prefetch::{prefetch_in_parallel, PrefetchPolicy};
use crate::errors::{QueryError, QueryResult};
use crate::observability::{PipelineEvent, Trace};

/// Ranks cursors; `Less` means "advance first"
pub type CursorComparer<C> = Arc<dyn Fn(&C, &C) -> Ordering + Send + Sync>;

/// Heap entry; the heap is a max-heap so the comparer is reversed
struct Ranked<C> {
    cursor: C,
    comparer: CursorComparer<C>,
}

impl<C> PartialEq for Ranked<C> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<C> Eq for Ranked<C> {}

impl<C> PartialOrd for Ranked<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for Ranked<C> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.comparer)(&other.cursor, &self.cursor)
    }
}

pub struct CrossPartitionRangePageEnumerator<C: RangeCursor> {
    provider: Arc<dyn DocumentContainer>,
    heap: BinaryHeap<Ranked<C>>,
    comparer: CursorComparer<C>,
    max_concurrency: usize,
    prefetch_policy: PrefetchPolicy,
    cancellation: CancellationToken,
    current: Option<QueryPageResult>,
}

impl<C: RangeCursor> CrossPartitionRangePageEnumerator<C> {
    /// Build over `cursors`; a negative `max_concurrency` is rejected
    pub fn monadic_create(
        provider: Arc<dyn DocumentContainer>,
        cursors: Vec<C>,
        comparer: CursorComparer<C>,
        max_concurrency: i32,
        prefetch_policy: PrefetchPolicy,
        cancellation: CancellationToken,
    ) -> QueryResult<Self> {
        if max_concurrency < 0 {
            return Err(QueryError::invalid_argument(format!(
                "max_concurrency must be non-negative, got {}",
                max_concurrency
            )));
        }
        let heap = cursors
            .into_iter()
            .map(|cursor| Ranked {
                cursor,
                comparer: Arc::clone(&comparer),
            })
            .collect();
        Ok(Self {
            provider,
            heap,
            comparer,
            max_concurrency: max_concurrency as usize,
            prefetch_policy,
            cancellation,
            current: None,
        })
    }

    pub fn current(&self) -> Option<&QueryPageResult> {
        self.current.as_ref()
    }

    pub fn take_current(&mut self) -> Option<QueryPageResult> {
        self.current.take()
    }

    /// True once every cursor is drained
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Cursors in the working set, in no particular order
    pub fn cursors(&self) -> impl Iterator<Item = &C> {
        self.heap.iter().map(|ranked| &ranked.cursor)
    }

    /// True when the best-ranked cursor needs a backend page
    pub fn needs_fetch(&self) -> bool {
        self.heap
            .peek()
            .map(|ranked| ranked.cursor.needs_fetch())
            .unwrap_or(false)
    }

    /// Apply `update` to every cursor and re-rank
    pub fn update_cursors(&mut self, mut update: impl FnMut(&mut C)) {
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        for entry in entries.iter_mut() {
            update(&mut entry.cursor);
        }
        self.heap = BinaryHeap::from(entries);
    }

    /// Run `take` on the best-ranked cursor unless it needs a fetch; the
    /// cursor is re-ranked afterwards, or dropped if it became exhausted.
    pub fn with_best<T>(&mut self, take: impl FnOnce(&mut C) -> Option<T>) -> Option<T> {
        let mut top = self.heap.peek_mut()?;
        if top.cursor.needs_fetch() {
            return None;
        }
        let value = take(&mut top.cursor);
        if top.cursor.is_exhausted() {
            PeekMut::pop(top);
        }
        value
    }

    /// Buffer a page for every pending cursor, bounded by `max_concurrency`
    pub async fn prefetch_pending(&mut self, trace: &Trace) {
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        prefetch_in_parallel(
            entries.iter_mut().map(|entry| &mut entry.cursor),
            self.max_concurrency,
            trace,
        )
        .await;
        self.heap = BinaryHeap::from(entries);
    }

    /// Fetch one page for the best-ranked cursor that needs one
    ///
    /// Returns false when no cursor needs a fetch (all drained, or every
    /// remaining cursor still has buffered work).
    pub async fn move_next(&mut self, trace: &Trace) -> bool {
        loop {
            if self.cancellation.is_cancelled() {
                tracing::debug!(event = %PipelineEvent::Cancelled, "cross-partition fetch cancelled");
                self.current = Some(Err(QueryError::Cancelled));
                return true;
            }
            if !self.needs_fetch() {
                return false;
            }
            if self.prefetch_policy == PrefetchPolicy::PrefetchAll {
                self.prefetch_pending(trace).await;
            }

            let mut top = match self.heap.peek_mut() {
                Some(top) => top,
                None => return false,
            };
            let result = top.cursor.fetch(trace).await;
            match result {
                Err(error) if error.is_partition_gone() => {
                    let gone = PeekMut::pop(top).cursor;
                    if let Err(error) = self.repair(gone, error, trace).await {
                        self.current = Some(Err(error));
                        return true;
                    }
                }
                Err(error) => {
                    // Cursor stays in place with its state unchanged.
                    drop(top);
                    self.current = Some(Err(error));
                    return true;
                }
                Ok(page) => {
                    if top.cursor.is_exhausted() {
                        PeekMut::pop(top);
                    } else {
                        drop(top);
                    }
                    self.current = Some(Ok(page));
                    return true;
                }
            }
        }
    }

    /// Replace a gone cursor. On failure the cursor is put back so that a
    /// later call retries instead of silently skipping the range.
    async fn repair(&mut self, gone: C, error: QueryError, trace: &Trace) -> QueryResult<()> {
        let range = gone.feed_range().clone();
        let repair_trace = trace.start_child(format!("Repair {}", range));

        let mut children = match self.child_ranges(&range, &repair_trace).await {
            Ok(children) => children,
            Err(err) => {
                self.push(gone);
                return Err(err);
            }
        };

        if children.len() == 1 && children[0] == range {
            // The provider still reports the gone range; its cache is stale.
            let refreshed = self
                .provider
                .refresh_provider(&repair_trace, &self.cancellation)
                .await;
            if let Err(err) = refreshed {
                self.push(gone);
                return Err(err);
            }
            tracing::debug!(event = %PipelineEvent::ProviderRefreshed, range = %range, "range provider refreshed");
            children = match self.child_ranges(&range, &repair_trace).await {
                Ok(children) => children,
                Err(err) => {
                    self.push(gone);
                    return Err(err);
                }
            };
            if children.len() == 1 && children[0] == range {
                self.push(gone);
                return Err(error);
            }
        }

        if children.is_empty() {
            self.push(gone);
            return Err(QueryError::internal(format!(
                "no child ranges for gone range {}",
                range
            )));
        }

        if children.len() == 1 && children[0].contains(&range) {
            let covering = children.remove(0);
            self.merge(gone, covering, &repair_trace);
            return Ok(());
        }

        if children.iter().all(|child| range.contains(child)) {
            tracing::debug!(
                event = %PipelineEvent::SplitDetected,
                range = %range,
                children = children.len(),
                "range split"
            );
            repair_trace.metrics().increment_splits();
            for child in gone.split(&children) {
                self.push(child);
            }
            return Ok(());
        }

        self.push(gone);
        Err(QueryError::internal(format!(
            "child ranges {:?} do not tile gone range {}",
            children, range
        )))
    }

    fn merge(&mut self, gone: C, covering: FeedRange, trace: &Trace) {
        let entries = std::mem::take(&mut self.heap).into_vec();
        let (absorbed, kept): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|entry| covering.contains(entry.cursor.feed_range()));
        self.heap = BinaryHeap::from(kept);

        tracing::debug!(
            event = %PipelineEvent::MergeDetected,
            range = %gone.feed_range(),
            covering = %covering,
            absorbed = absorbed.len(),
            "ranges merged"
        );
        trace.metrics().increment_merges();

        let siblings = absorbed.into_iter().map(|entry| entry.cursor).collect();
        self.push(C::merge(gone, siblings, covering));
    }

    async fn child_ranges(&self, range: &FeedRange, trace: &Trace) -> QueryResult<Vec<FeedRange>> {
        let mut children = self
            .provider
            .get_child_ranges(range, trace, &self.cancellation)
            .await?;
        children.sort();
        Ok(children)
    }

    fn push(&mut self, cursor: C) {
        self.heap.push(Ranked {
            cursor,
            comparer: Arc::clone(&self.comparer),
        });
    }

    /// Drop every cursor
    pub fn dispose(&mut self) {
        self.heap.clear();
        self.current = None;
    }
}
