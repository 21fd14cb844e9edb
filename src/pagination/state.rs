//! Per-range resumption state

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::feed_range::FeedRange;

/// Opaque backend continuation for one range
///
/// The pipeline never inspects the value; it is round-tripped verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryState(pub Value);

impl QueryState {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

/// The unit of resumable work: a range and where to continue inside it
///
/// `state == None` means "start from the beginning of the range".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRangeState {
    pub feed_range: FeedRange,
    #[serde(default)]
    pub state: Option<QueryState>,
}

impl FeedRangeState {
    pub fn new(feed_range: FeedRange, state: Option<QueryState>) -> Self {
        Self { feed_range, state }
    }

    /// A range that has not been started
    pub fn unstarted(feed_range: FeedRange) -> Self {
        Self::new(feed_range, None)
    }
}
