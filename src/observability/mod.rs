//! Observability subsystem
//!
//! This module provides:
//! - Structured logging through `tracing`, keyed by typed event names
//! - Lock-free pipeline metrics
//! - The explicit diagnostics trace passed through every stage
//!
//! # Usage
//!
//! ```ignore
//! use crossquery::observability::{PipelineEvent, Trace};
//!
//! let trace = Trace::root("query");
//! let fetch = trace.start_child("fetch");
//! fetch.add_datum("requestCharge", 2.5);
//! tracing::debug!(event = %PipelineEvent::RangeFetch, "page received");
//! ```

mod events;
mod metrics;
mod trace;

pub use events::PipelineEvent;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use trace::Trace;
