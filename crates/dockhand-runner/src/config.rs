// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for dockhand-runner.
//!
//! [`Config`] is built once at startup and shared as `Arc<Config>` by every
//! component. It carries the platform context (region, account, state
//! tables) and the schedules of every bounded wait the orchestrator performs.

use std::time::Duration;

/// Cluster used when a runner does not name one.
pub const DEFAULT_CLUSTER: &str = "dockhand-default";

/// Where the worker binary is fetched from when it is not baked into the image.
pub const DEFAULT_RUNNER_DOWNLOAD_URL: &str =
    "https://downloads.dockhand.dev/runner/dockhand-runner-linux-amd64";

/// Worker version installed by the bootstrap command.
pub const DEFAULT_RUNNER_VERSION: &str = "2.0.1";

/// A bounded poll: `attempts` checks, each preceded by a sleep of `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Maximum number of checks.
    pub attempts: u32,
    /// Delay before every check.
    pub interval: Duration,
}

impl PollSchedule {
    /// Create a schedule.
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Upper bound of the time spent sleeping by this schedule.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.attempts
    }
}

/// Runner orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Region the runners live in, passed to workers and VM log config.
    pub region: String,
    /// Account id, passed to workers.
    pub account_id: String,
    /// Deployment data table the worker reads job definitions from.
    pub deploy_data_table: String,
    /// Resource state table holding runner records.
    pub resource_state_table: String,
    /// Cluster used when the task configuration names none.
    pub default_cluster: String,
    /// Download location of the worker binary.
    pub runner_download_url: String,
    /// Worker version installed by the bootstrap command.
    pub runner_version: String,
    /// Application-level readiness wait after a fresh task start.
    pub readiness: PollSchedule,
    /// Wait for the scheduler to move a new task out of `starting`.
    pub task_start: PollSchedule,
    /// Wait for a replaced task to be observed fully stopped.
    pub task_stop: PollSchedule,
    /// Wait for a new VM to register with the container cluster.
    pub vm_registration: PollSchedule,
    /// Delay before re-describing a task that reads as dead right after launch.
    pub dead_task_retry_delay: Duration,
    /// Age after which a held lock may be taken over by another execution.
    pub lock_stale_after: Duration,
}

impl Config {
    /// Create a configuration with default schedules.
    pub fn new(
        region: impl Into<String>,
        account_id: impl Into<String>,
        deploy_data_table: impl Into<String>,
        resource_state_table: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
            deploy_data_table: deploy_data_table.into(),
            resource_state_table: resource_state_table.into(),
            default_cluster: DEFAULT_CLUSTER.to_string(),
            runner_download_url: DEFAULT_RUNNER_DOWNLOAD_URL.to_string(),
            runner_version: DEFAULT_RUNNER_VERSION.to_string(),
            readiness: PollSchedule::new(300, Duration::from_secs(2)),
            task_start: PollSchedule::new(150, Duration::from_secs(2)),
            task_stop: PollSchedule::new(150, Duration::from_secs(2)),
            vm_registration: PollSchedule::new(120, Duration::from_secs(2)),
            dead_task_retry_delay: Duration::from_secs(3),
            lock_stale_after: Duration::from_secs(3600),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let region = required("DOCKHAND_REGION")?;
        let account_id = required("DOCKHAND_ACCOUNT_ID")?;
        let deploy_data_table = required("DOCKHAND_DEPLOY_DATA_TABLE")?;
        let resource_state_table = required("DOCKHAND_RESOURCE_STATE_TABLE")?;

        let mut config = Self::new(region, account_id, deploy_data_table, resource_state_table);

        if let Ok(cluster) = std::env::var("DOCKHAND_DEFAULT_CLUSTER") {
            config.default_cluster = cluster;
        }
        if let Ok(url) = std::env::var("DOCKHAND_RUNNER_DOWNLOAD_URL") {
            config.runner_download_url = url;
        }
        if let Ok(version) = std::env::var("DOCKHAND_RUNNER_VERSION") {
            config.runner_version = version;
        }

        if let Some(attempts) = parsed::<u32>("DOCKHAND_READINESS_ATTEMPTS")? {
            config.readiness.attempts = attempts;
        }
        if let Some(secs) = parsed::<u64>("DOCKHAND_READINESS_INTERVAL_SECS")? {
            config.readiness.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed::<u64>("DOCKHAND_LOCK_STALE_AFTER_SECS")? {
            config.lock_stale_after = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Cluster for a task configuration that may not name one.
    pub fn cluster_or_default<'a>(&'a self, cluster: Option<&'a str>) -> &'a str {
        cluster.unwrap_or(&self.default_cluster)
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name))
}

fn parsed<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A numeric environment variable could not be parsed.
    #[error("Invalid value for {name}: {value:?} is not a number")]
    InvalidNumber {
        /// Variable name.
        name: &'static str,
        /// Raw value found in the environment.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedules() {
        let config = Config::new("eu-west-1", "123456789012", "deploy-data", "resource-state");
        assert_eq!(config.readiness.ceiling(), Duration::from_secs(600));
        assert_eq!(config.vm_registration.ceiling(), Duration::from_secs(240));
        assert_eq!(config.default_cluster, DEFAULT_CLUSTER);
    }

    #[test]
    fn test_cluster_or_default() {
        let config = Config::new("eu-west-1", "123456789012", "deploy-data", "resource-state");
        assert_eq!(config.cluster_or_default(None), "dockhand-default");
        assert_eq!(config.cluster_or_default(Some("build")), "build");
    }
}
