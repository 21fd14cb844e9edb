use serde::{Deserialize, Serialize};

use super::row::OrderByItem;
use crate::pagination::{FeedRange, QueryState};

/// Position of the last row handed to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderByCheckpoint {
    pub order_by_items: Vec<OrderByItem>,
    pub rid: String,
    /// Rows at exactly this position already emitted
    pub skip_count: u64,
}

impl OrderByCheckpoint {
    pub fn new(order_by_items: Vec<OrderByItem>, rid: impl Into<String>) -> Self {
        Self {
            order_by_items,
            rid: rid.into(),
            skip_count: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderByRangeToken {
    pub range: FeedRange,
    /// Backend state to re-request from; `None` starts the range over
    #[serde(default)]
    pub state: Option<QueryState>,
    #[serde(default)]
    pub checkpoint: Option<OrderByCheckpoint>,
    /// WHERE-clause text the range was running with
    #[serde(default)]
    pub filter: String,
}

/// Streaming order-by: every range with work left, including unstarted ones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderByContinuationToken {
    pub ranges: Vec<OrderByRangeToken>,
}

/// Non-streaming order-by resumes by re-sorting and skipping what was sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonStreamingOrderByContinuationToken {
    pub emitted: u64,
}
