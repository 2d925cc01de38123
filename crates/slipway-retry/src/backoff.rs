//! Backoff schedules: exponential for most task classes, linear where a
//! steady wait between attempts fits better.

use std::time::Duration;

use crate::context::{RetryContext, RetryDecision};

/// Retry schedule for one class of task.
///
/// `delay(attempt) = min(multiplier^attempt, max_backoff)`. Caps are
/// per-task-class: seconds for chatty polls, tens of minutes for store
/// submissions.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Base of the exponential schedule.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Retries after the initial attempt before giving up.
    pub max_retries: u32,
    /// Randomize delays into `[delay/2, delay]` to spread contending tasks.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            multiplier: 2.0,
            max_backoff: Duration::from_secs(300),
            max_retries: 3,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Policy with the default multiplier and no jitter.
    pub fn new(max_retries: u32, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            max_backoff,
            ..Self::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Deterministic delay for the given attempt (1-based), before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Delay for the given attempt with jitter applied, if enabled.
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if !self.jitter {
            return delay;
        }
        // Equal jitter: [delay/2, delay].
        let half = delay.as_secs_f64() / 2.0;
        Duration::from_secs_f64(half + half * fastrand::f64())
    }

    /// Decide what to do after a recorded failure.
    ///
    /// Retries while `retry_count <= max_retries`; the decision carries the
    /// context forward so the eventual failure handler has full provenance.
    pub fn next_attempt(&self, context: RetryContext) -> RetryDecision {
        if context.retry_count > self.max_retries {
            RetryDecision::Exhausted { context }
        } else {
            let after = self.jittered_delay_for(context.retry_count);
            RetryDecision::Retry { after, context }
        }
    }
}

/// Linear retry schedule for one class of task.
///
/// `delay(attempt) = min(step * attempt, max_backoff)`. Store submission
/// retries use this: the store's review queue does not clear faster under a
/// back-loaded exponential wait, so attempts are spaced a steady step apart.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearBackoff {
    /// Added to the delay on every attempt.
    pub step: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Retries after the initial attempt before giving up.
    pub max_retries: u32,
}

impl LinearBackoff {
    pub fn new(max_retries: u32, step: Duration, max_backoff: Duration) -> Self {
        Self {
            step,
            max_backoff,
            max_retries,
        }
    }

    /// Delay for the given attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        (self.step * attempt).min(self.max_backoff)
    }

    /// Decide what to do after a recorded failure.
    ///
    /// Same contract as [`BackoffPolicy::next_attempt`]: retries while
    /// `retry_count <= max_retries`, carrying the context forward.
    pub fn next_attempt(&self, context: RetryContext) -> RetryDecision {
        if context.retry_count > self.max_retries {
            RetryDecision::Exhausted { context }
        } else {
            let after = self.delay_for(context.retry_count);
            RetryDecision::Retry { after, context }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_sequence_is_capped_powers() {
        let policy = BackoffPolicy::new(10, Duration::from_secs(8));
        let delays: Vec<u64> = (1..=5).map(|n| policy.delay_for(n).as_secs()).collect();
        // min(2^n, 8) for n = 1..5.
        assert_eq!(delays, vec![2, 4, 8, 8, 8]);
    }

    #[test]
    fn custom_multiplier() {
        let policy = BackoffPolicy::new(5, Duration::from_secs(600)).with_multiplier(3.0);
        assert_eq!(policy.delay_for(1).as_secs(), 3);
        assert_eq!(policy.delay_for(4).as_secs(), 81);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = BackoffPolicy::new(5, Duration::from_secs(64)).with_jitter();
        for attempt in 1..=6 {
            let base = policy.delay_for(attempt);
            let jittered = policy.jittered_delay_for(attempt);
            assert!(jittered <= base);
            assert!(jittered.as_secs_f64() >= base.as_secs_f64() / 2.0);
        }
    }

    #[test]
    fn linear_delay_sequence_is_capped_multiples() {
        let policy = LinearBackoff::new(10, Duration::from_secs(2), Duration::from_secs(6));
        let delays: Vec<u64> = (1..=5).map(|n| policy.delay_for(n).as_secs()).collect();
        // min(2 * n, 6) for n = 1..5.
        assert_eq!(delays, vec![2, 4, 6, 6, 6]);
    }

    #[test]
    fn linear_retries_until_exhausted() {
        let policy = LinearBackoff::new(2, Duration::from_secs(1), Duration::from_secs(10));
        let context = RetryContext::new("corr-1")
            .record_failure("provider timeout")
            .record_failure("provider timeout")
            .record_failure("provider timeout");
        assert!(matches!(
            policy.next_attempt(context),
            RetryDecision::Exhausted { .. }
        ));
    }

    #[test]
    fn retries_until_exhausted() {
        let policy = BackoffPolicy::new(3, Duration::from_secs(60));
        let mut context = RetryContext::new("corr-1");

        // Failures 1..=3 retry, failure 4 is terminal.
        for _ in 0..3 {
            context = context.record_failure("provider timeout");
            match policy.next_attempt(context.clone()) {
                RetryDecision::Retry { context: c, .. } => context = c,
                RetryDecision::Exhausted { .. } => panic!("exhausted too early"),
            }
        }
        context = context.record_failure("provider timeout");
        assert!(matches!(
            policy.next_attempt(context),
            RetryDecision::Exhausted { .. }
        ));
    }
}
