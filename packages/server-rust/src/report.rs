//! Failures the pipeline absorbs instead of returning.
//!
//! A cache outage, a corrupt entry, a header injection failure and a publish
//! failure never fail the request. Each is handed to a [`FailureReporter`]
//! so it stays observable.

use futuretech_core::InjectionError;
use tracing::warn;

use crate::broker::BrokerError;
use crate::cache::CacheError;

/// A failure the pipeline recovered from.
#[derive(Debug, thiserror::Error)]
pub enum PipelineFailure {
    #[error("cache read for {key:?} failed: {source}")]
    CacheRead { key: String, source: CacheError },
    #[error("cache write for {key:?} failed: {source}")]
    CacheWrite { key: String, source: CacheError },
    #[error("cache entry {key:?} could not be decoded: {reason}")]
    CorruptEntry { key: String, reason: String },
    #[error("trace context injection failed: {0}")]
    Injection(#[source] InjectionError),
    #[error("publish to {queue:?} failed: {source}")]
    Publish { queue: String, source: BrokerError },
}

impl PipelineFailure {
    /// Short machine-readable label, used as a log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CacheRead { .. } => "cache_read",
            Self::CacheWrite { .. } => "cache_write",
            Self::CorruptEntry { .. } => "corrupt_entry",
            Self::Injection(_) => "injection",
            Self::Publish { .. } => "publish",
        }
    }
}

/// Sink for recovered failures.
pub trait FailureReporter: Send + Sync {
    fn report(&self, failure: &PipelineFailure);
}

/// Default reporter: one `warn` event per failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl FailureReporter for LogReporter {
    fn report(&self, failure: &PipelineFailure) {
        warn!(kind = failure.kind(), error = %failure, "pipeline step failed; continuing");
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_messages_name_the_resource() {
        let failure = PipelineFailure::Publish {
            queue: "queue".to_string(),
            source: BrokerError::Nacked,
        };
        assert_eq!(failure.kind(), "publish");
        assert_eq!(
            failure.to_string(),
            "publish to \"queue\" failed: broker refused to accept the message"
        );

        let failure = PipelineFailure::CacheRead {
            key: "forecast".to_string(),
            source: CacheError::Timeout { timeout_ms: 2000 },
        };
        assert_eq!(failure.kind(), "cache_read");
        assert!(failure.to_string().starts_with("cache read for \"forecast\""));
    }

    #[test]
    fn recording_reporter_keeps_order() {
        let reporter = testing::RecordingReporter::default();
        reporter.report(&PipelineFailure::Injection(InjectionError::EmptyKey));
        reporter.report(&PipelineFailure::CorruptEntry {
            key: "forecast".to_string(),
            reason: "expected value".to_string(),
        });
        assert_eq!(reporter.kinds(), vec!["injection", "corrupt_entry"]);
        assert_eq!(reporter.messages().len(), 2);
    }
}
