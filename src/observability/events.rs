//! Observable pipeline events
//!
//! Events are explicit and typed. Every structured log line the pipeline
//! emits carries one of these names in its `event` field.

use std::fmt;

/// Observable events in the query pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    // Construction
    /// Stage chain assembled
    PipelineCreated,
    /// Continuation token failed to decode
    ContinuationDecodeFailed,

    // Range enumeration
    /// One backend fetch issued for one range
    RangeFetch,
    /// A range returned its final page
    RangeDrained,
    /// Range reported gone and resolved to several children
    SplitDetected,
    /// Range reported gone and resolved to a covering parent
    MergeDetected,
    /// Range provider refreshed after a stale topology
    ProviderRefreshed,
    /// Pages buffered ahead of consumption
    Prefetch,

    // Stage lifecycle
    /// A stage surfaced a failure result
    StageFailure,
    /// Panic captured by the catch-all stage
    StagePanic,
    /// A stage reported permanent exhaustion
    StageExhausted,
    /// move_next called after exhaustion
    MoveNextAfterExhaustion,
    /// Cancellation observed
    Cancelled,

    // Hybrid search
    /// Corpus statistics summed across every range
    GlobalStatisticsGathered,
    /// Component results fused into one ranking
    RanksFused,
}

impl PipelineEvent {
    /// Returns the event name
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineEvent::PipelineCreated => "pipeline_created",
            PipelineEvent::ContinuationDecodeFailed => "continuation_decode_failed",
            PipelineEvent::RangeFetch => "range_fetch",
            PipelineEvent::RangeDrained => "range_drained",
            PipelineEvent::SplitDetected => "split_detected",
            PipelineEvent::MergeDetected => "merge_detected",
            PipelineEvent::ProviderRefreshed => "provider_refreshed",
            PipelineEvent::Prefetch => "prefetch",
            PipelineEvent::StageFailure => "stage_failure",
            PipelineEvent::StagePanic => "stage_panic",
            PipelineEvent::StageExhausted => "stage_exhausted",
            PipelineEvent::MoveNextAfterExhaustion => "move_next_after_exhaustion",
            PipelineEvent::Cancelled => "cancelled",
            PipelineEvent::GlobalStatisticsGathered => "global_statistics_gathered",
            PipelineEvent::RanksFused => "ranks_fused",
        }
    }

    /// Returns true if this event reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PipelineEvent::ContinuationDecodeFailed
                | PipelineEvent::StageFailure
                | PipelineEvent::StagePanic
                | PipelineEvent::MoveNextAfterExhaustion
        )
    }
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_snake_case() {
        for event in [
            PipelineEvent::RangeFetch,
            PipelineEvent::SplitDetected,
            PipelineEvent::StagePanic,
        ] {
            let name = event.as_str();
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }

    #[test]
    fn test_failure_classification() {
        assert!(PipelineEvent::StagePanic.is_failure());
        assert!(!PipelineEvent::RangeDrained.is_failure());
    }
}
