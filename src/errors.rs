//! # Query Errors
//!
//! Error taxonomy for the query pipeline.
//!
//! Error codes:
//! - QUERY_MALFORMED_CONTINUATION (fatal to construction, never retried)
//! - QUERY_PARTITION_GONE (recovered inside the cross-partition enumerator)
//! - QUERY_THROTTLED / QUERY_BACKEND_FAILURE (surfaced, retry is the caller's concern)
//! - QUERY_CANCELLED
//! - QUERY_INVALID_ARGUMENT
//! - QUERY_INTERNAL (unexpected failure captured by the catch-all stage)

use thiserror::Error;

use crate::pagination::FeedRange;

/// Result type for query pipeline operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Query pipeline errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    // ==================
    // Continuation Errors
    // ==================
    /// Token shape does not match the assembled stage topology
    #[error("Malformed continuation token: {0}")]
    MalformedContinuationToken(String),

    // ==================
    // Topology Errors
    // ==================
    /// The range was split or merged away
    #[error("Feed range {range} is gone (split or merge)")]
    PartitionGone { range: FeedRange },

    // ==================
    // Backend Errors
    // ==================
    /// Request rate too large
    #[error("Request throttled, retry after {retry_after_ms} ms")]
    Throttled { retry_after_ms: u64 },

    /// Any other backend failure
    #[error("Backend failure ({status_code}): {message}")]
    Backend { status_code: u16, message: String },

    // ==================
    // Caller Errors
    // ==================
    /// Cancellation was requested
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid construction argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ==================
    // Internal Errors
    // ==================
    /// Unexpected failure inside a stage
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Create a malformed continuation error
    pub fn malformed(reason: impl Into<String>) -> Self {
        QueryError::MalformedContinuationToken(reason.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        QueryError::InvalidArgument(reason.into())
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        QueryError::Internal(reason.into())
    }

    /// Returns the string code for this error
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::MalformedContinuationToken(_) => "QUERY_MALFORMED_CONTINUATION",
            QueryError::PartitionGone { .. } => "QUERY_PARTITION_GONE",
            QueryError::Throttled { .. } => "QUERY_THROTTLED",
            QueryError::Backend { .. } => "QUERY_BACKEND_FAILURE",
            QueryError::Cancelled => "QUERY_CANCELLED",
            QueryError::InvalidArgument(_) => "QUERY_INVALID_ARGUMENT",
            QueryError::Internal(_) => "QUERY_INTERNAL",
        }
    }

    /// Returns the HTTP-like status code
    pub fn status_code(&self) -> u16 {
        match self {
            QueryError::MalformedContinuationToken(_) => 400,
            QueryError::InvalidArgument(_) => 400,
            QueryError::PartitionGone { .. } => 410,
            QueryError::Throttled { .. } => 429,
            QueryError::Backend { status_code, .. } => *status_code,
            QueryError::Cancelled => 499,
            QueryError::Internal(_) => 500,
        }
    }

    /// True for the split/merge signal
    pub fn is_partition_gone(&self) -> bool {
        matches!(self, QueryError::PartitionGone { .. })
    }

    /// True when re-issuing the same call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            QueryError::Throttled { .. } | QueryError::PartitionGone { .. } => true,
            QueryError::Backend { status_code, .. } => matches!(status_code, 408 | 503),
            _ => false,
        }
    }
}
