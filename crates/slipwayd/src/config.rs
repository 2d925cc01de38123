//! slipway.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use slipway_coordinator::CoordinatorConfig;
use slipway_retry::LinearBackoff;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlipwayConfig {
    pub rollout: Option<RolloutConfig>,
    pub jobs: Option<JobsConfig>,
    pub health: Option<HealthConfig>,
    pub build_queue: Option<BuildQueueConfig>,
    pub notify: Option<NotifyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutConfig {
    /// Stage percentages, ascending, last must be 100.
    pub stages: Option<Vec<f64>>,
    /// Whether new rollouts advance automatically.
    pub automatic: Option<bool>,
    /// Seconds between automatic stage increases.
    pub interval_secs: Option<u64>,
    /// Seconds between engine sweeps.
    pub sweep_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Retries after the initial store submission attempt.
    pub submission_max_retries: Option<u32>,
    /// Seconds added to the submission retry delay per attempt.
    pub submission_step_secs: Option<u64>,
    /// Cap on a single submission retry delay, in seconds.
    pub submission_max_backoff_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds a finished production release keeps being polled.
    pub monitor_window_secs: Option<u64>,
    /// Seconds between health polls for an active production release.
    pub poll_frequency_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildQueueConfig {
    /// Queued commits that force a build queue application.
    pub threshold: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub channel: Option<String>,
}

impl SlipwayConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SlipwayConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Some(stages) = self.rollout.as_ref().and_then(|r| r.stages.as_deref()) {
            anyhow::ensure!(!stages.is_empty(), "rollout.stages must not be empty");
            anyhow::ensure!(
                stages.windows(2).all(|w| w[0] < w[1]),
                "rollout.stages must be strictly ascending"
            );
            anyhow::ensure!(
                stages.last() == Some(&100.0),
                "rollout.stages must end at 100"
            );
        }
        Ok(())
    }

    /// Coordinator tunables, with defaults for anything the file omits.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let defaults = CoordinatorConfig::default();
        let retry_defaults = defaults.submission_retry.clone();
        CoordinatorConfig {
            rollout_stages: self
                .rollout
                .as_ref()
                .and_then(|r| r.stages.clone())
                .unwrap_or(defaults.rollout_stages),
            automatic_rollouts: self
                .rollout
                .as_ref()
                .and_then(|r| r.automatic)
                .unwrap_or(defaults.automatic_rollouts),
            build_queue_threshold: self
                .build_queue
                .as_ref()
                .and_then(|b| b.threshold)
                .unwrap_or(defaults.build_queue_threshold),
            health_poll_frequency_secs: self
                .health
                .as_ref()
                .and_then(|h| h.poll_frequency_secs)
                .unwrap_or(defaults.health_poll_frequency_secs),
            submission_retry: LinearBackoff::new(
                self.jobs
                    .as_ref()
                    .and_then(|j| j.submission_max_retries)
                    .unwrap_or(retry_defaults.max_retries),
                self.jobs
                    .as_ref()
                    .and_then(|j| j.submission_step_secs)
                    .map(Duration::from_secs)
                    .unwrap_or(retry_defaults.step),
                self.jobs
                    .as_ref()
                    .and_then(|j| j.submission_max_backoff_secs)
                    .map(Duration::from_secs)
                    .unwrap_or(retry_defaults.max_backoff),
            ),
            notify_channel: self
                .notify
                .as_ref()
                .and_then(|n| n.channel.clone())
                .unwrap_or(defaults.notify_channel),
        }
    }

    /// Seconds between automatic stage increases.
    pub fn rollout_interval(&self) -> Option<Duration> {
        self.rollout
            .as_ref()
            .and_then(|r| r.interval_secs)
            .map(Duration::from_secs)
    }

    /// Seconds between engine sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(
            self.rollout
                .as_ref()
                .and_then(|r| r.sweep_secs)
                .unwrap_or(60),
        )
    }

    /// How long a finished production release keeps being polled.
    pub fn monitor_window(&self) -> Option<Duration> {
        self.health
            .as_ref()
            .and_then(|h| h.monitor_window_secs)
            .map(Duration::from_secs)
    }
}
