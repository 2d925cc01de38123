//! Retry provenance carried across re-enqueues.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Context bag threaded through every retry of one logical task.
///
/// Serializable so a re-enqueued job payload can carry it; the terminal
/// failure handler logs it whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryContext {
    /// Number of failures recorded so far.
    pub retry_count: u32,
    /// The first error observed. Later failures do not overwrite it.
    pub original_error: Option<String>,
    /// Correlates all attempts of one logical operation in logs.
    pub correlation_id: String,
}

impl RetryContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            retry_count: 0,
            original_error: None,
            correlation_id: correlation_id.into(),
        }
    }

    /// Record a failure: bump the count, keep the original error.
    pub fn record_failure(mut self, error: impl Into<String>) -> Self {
        self.retry_count += 1;
        if self.original_error.is_none() {
            self.original_error = Some(error.into());
        }
        self
    }
}

/// Outcome of consulting the policy after a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Re-enqueue after the delay, carrying the context forward.
    Retry {
        after: Duration,
        context: RetryContext,
    },
    /// Budget spent: run the terminal failure handler exactly once.
    Exhausted { context: RetryContext },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn original_error_is_preserved() {
        let context = RetryContext::new("corr-9")
            .record_failure("rate limited")
            .record_failure("503 from store");

        assert_eq!(context.retry_count, 2);
        assert_eq!(context.original_error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn context_survives_serialization() {
        let context = RetryContext::new("corr-1").record_failure("timeout");
        let json = serde_json::to_string(&context).unwrap();
        let back: RetryContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back, context);
    }
}
