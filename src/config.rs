//! Query Pipeline Configuration
//!
//! Request-level knobs for a cross-partition query: fan-out concurrency,
//! page size and prefetch eagerness.

use serde::{Deserialize, Serialize};

use crate::errors::{QueryError, QueryResult};
use crate::pagination::PrefetchPolicy;

/// Page size used when the caller leaves `max_item_count` unset
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Query pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPipelineConfig {
    /// Maximum partition fetches in flight (default: 0, sequential)
    #[serde(default)]
    pub max_concurrency: i32,

    /// Rows per page; zero or negative means backend default (default: -1)
    #[serde(default = "default_max_item_count")]
    pub max_item_count: i32,

    /// Prefetch eagerness (default: PrefetchSinglePage)
    #[serde(default)]
    pub prefetch_policy: PrefetchPolicy,

    /// Multiplier applied to TOP/LIMIT when sizing backend pages (default: 5)
    #[serde(default = "default_top_page_size_factor")]
    pub top_page_size_factor: u32,
}

fn default_max_item_count() -> i32 {
    -1
}

fn default_top_page_size_factor() -> u32 {
    5
}

impl Default for QueryPipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            max_item_count: default_max_item_count(),
            prefetch_policy: PrefetchPolicy::default(),
            top_page_size_factor: default_top_page_size_factor(),
        }
    }
}

impl QueryPipelineConfig {
    /// Parse a JSON document, filling unset fields with defaults
    pub fn from_json_str(json: &str) -> QueryResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| QueryError::invalid_argument(format!("configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a config with the given page size
    pub fn with_page_size(max_item_count: i32) -> Self {
        Self {
            max_item_count,
            ..Default::default()
        }
    }

    /// Builder: set fan-out concurrency
    pub fn max_concurrency(mut self, max_concurrency: i32) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Builder: set prefetch policy
    pub fn prefetch_policy(mut self, policy: PrefetchPolicy) -> Self {
        self.prefetch_policy = policy;
        self
    }

    /// Reject settings the pipeline cannot honor
    pub fn validate(&self) -> QueryResult<()> {
        if self.max_concurrency < 0 {
            return Err(QueryError::invalid_argument(format!(
                "max_concurrency must be non-negative, got {}",
                self.max_concurrency
            )));
        }
        Ok(())
    }

    /// Effective page size
    pub fn page_size(&self) -> usize {
        if self.max_item_count <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.max_item_count as usize
        }
    }

    /// Page size requested from each range when the query keeps at most
    /// `top` rows.
    pub fn page_size_for_top(&self, top: Option<u64>) -> usize {
        let page_size = self.page_size();
        match top {
            Some(top) => {
                let scaled = top.saturating_mul(self.top_page_size_factor as u64);
                (scaled.min(page_size as u64) as usize).max(1)
            }
            None => page_size,
        }
    }
}
