//! Diagnostics trace handle
//!
//! A `Trace` is passed explicitly into every `move_next` call. It forms a
//! tree (one child per stage step or backend fetch), holds key/value data
//! such as request charge, and owns a `tracing` span so that log events
//! emitted while it is active line up with the tree.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::metrics::PipelineMetrics;

/// Hierarchical diagnostics node
#[derive(Debug)]
pub struct Trace {
    name: String,
    span: tracing::Span,
    started_at: DateTime<Utc>,
    started: Instant,
    children: Mutex<Vec<Arc<Trace>>>,
    data: Mutex<BTreeMap<String, Value>>,
    metrics: Arc<PipelineMetrics>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Trace data is append-only; a panic elsewhere leaves it consistent.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Trace {
    /// Create a root trace with fresh metrics
    pub fn root(name: impl Into<String>) -> Arc<Trace> {
        let name = name.into();
        let span = tracing::debug_span!("query", trace = %name);
        Arc::new(Self::build(name, span, Arc::new(PipelineMetrics::new())))
    }

    fn build(name: String, span: tracing::Span, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            name,
            span,
            started_at: Utc::now(),
            started: Instant::now(),
            children: Mutex::new(Vec::new()),
            data: Mutex::new(BTreeMap::new()),
            metrics,
        }
    }

    /// Start a child node sharing this tree's metrics
    pub fn start_child(&self, name: impl Into<String>) -> Arc<Trace> {
        let name = name.into();
        let span = tracing::trace_span!(parent: &self.span, "step", trace = %name);
        let child = Arc::new(Self::build(name, span, Arc::clone(&self.metrics)));
        lock(&self.children).push(Arc::clone(&child));
        child
    }

    /// Attach a datum; a later value under the same key replaces it
    pub fn add_datum(&self, key: impl Into<String>, value: impl Into<Value>) {
        lock(&self.data).insert(key.into(), value.into());
    }

    /// Read a datum
    pub fn datum(&self, key: &str) -> Option<Value> {
        lock(&self.data).get(key).cloned()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Snapshot of direct children
    pub fn children(&self) -> Vec<Arc<Trace>> {
        lock(&self.children).clone()
    }

    /// Count of nodes below this one whose name starts with `prefix`
    pub fn count_descendants(&self, prefix: &str) -> usize {
        self.children()
            .iter()
            .map(|child| {
                let own = usize::from(child.name.starts_with(prefix));
                own + child.count_descendants(prefix)
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_shares_metrics() {
        let root = Trace::root("query");
        let child = root.start_child("fetch");
        child.metrics().record_page(2, 1.0);
        assert_eq!(root.metrics().pages_fetched(), 1);
        assert_eq!(root.children().len(), 1);
    }

    #[test]
    fn test_datum_overwrite() {
        let root = Trace::root("query");
        root.add_datum("charge", 1.5);
        root.add_datum("charge", 2.5);
        assert_eq!(root.datum("charge"), Some(serde_json::json!(2.5)));
        assert_eq!(root.datum("missing"), None);
    }

    #[test]
    fn test_count_descendants() {
        let root = Trace::root("query");
        let stage = root.start_child("stage");
        stage.start_child("fetch [0]");
        stage.start_child("fetch [1]");
        root.start_child("fetch [2]");
        assert_eq!(root.count_descendants("fetch"), 3);
    }
}
