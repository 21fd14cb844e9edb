//! Prefetch policy and bounded parallel prefetch

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use super::cursor::RangeCursor;
use crate::observability::{PipelineEvent, Trace};

/// How eagerly ranges are fetched ahead of consumption
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrefetchPolicy {
    /// Fetch only the range the consumer needs next
    #[default]
    PrefetchSinglePage,
    /// Buffer one page for every pending range before each fetch
    PrefetchAll,
}

/// Buffer one page for each cursor that needs one, at most
/// `max_concurrency` at a time (zero runs them one after another).
pub(crate) async fn prefetch_in_parallel<'a, C, I>(cursors: I, max_concurrency: usize, trace: &'a Trace)
where
    C: RangeCursor + 'a,
    I: IntoIterator<Item = &'a mut C>,
{
    let pending: Vec<&'a mut C> = cursors
        .into_iter()
        .filter(|cursor| cursor.needs_fetch())
        .collect();
    if pending.is_empty() {
        return;
    }

    let prefetch_trace = trace.start_child("Prefetch");
    tracing::trace!(
        event = %PipelineEvent::Prefetch,
        ranges = pending.len(),
        max_concurrency,
        "prefetching ranges"
    );

    let limit = max_concurrency.max(1);
    let prefetch_trace = &prefetch_trace;
    stream::iter(pending)
        .for_each_concurrent(limit, |cursor| async move {
            cursor.prefetch(prefetch_trace).await;
        })
        .await;
}
