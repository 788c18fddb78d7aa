// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for dockhand-runner.

use thiserror::Error;

use crate::callback::FailureKind;

/// Error returned by an external service (container scheduler, VM API,
/// parameter store, queue, workflow callback).
///
/// `code` is the service's machine-readable error code; allow-lists match on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ProviderError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl ProviderError {
    /// Create a provider error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// True if `code` is one of `codes`.
    pub fn is_any_of(&self, codes: &[&str]) -> bool {
        codes.contains(&self.code.as_str())
    }
}

/// Runner orchestrator errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migrations could not be applied.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// External service call failed.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// No record exists for the runner.
    #[error("No runner found with name {0}")]
    RunnerNotFound(String),

    /// The runner's desired configuration is invalid.
    #[error("{0}")]
    Configuration(String),

    /// The backing VM could not be launched or never became usable.
    #[error("Failed to start runner instance: {0}")]
    VmStartFailed(String),

    /// The container task could not be launched or never reached running.
    #[error("Failed to start runner task: {0}")]
    TaskStartFailed(String),

    /// The task stopped before the worker reported ready.
    #[error("Runner task stopped: {}", stop_reason.as_deref().unwrap_or("no stop reason given"))]
    TaskStopped {
        /// Scheduler stop code.
        stop_code: Option<String>,
        /// Scheduler stop reason.
        stop_reason: Option<String>,
    },

    /// The worker did not report ready within the readiness schedule.
    #[error("Runner task {task_id} did not become ready within {waited_secs}s")]
    ReadinessTimeout {
        /// Task that was stopped after the timeout.
        task_id: String,
        /// Seconds spent waiting.
        waited_secs: u64,
    },

    /// A replaced task was not observed stopped within the stop schedule.
    #[error("Runner task {0} did not stop in time")]
    StopTimeout(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Error kind reported to the waiting workflow step.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Configuration(_) | Error::RunnerNotFound(_) => FailureKind::Configuration,
            Error::VmStartFailed(_) => FailureKind::VmStartFailed,
            Error::TaskStartFailed(_) | Error::StopTimeout(_) => FailureKind::TaskStartFailed,
            Error::TaskStopped { stop_code, .. } => FailureKind::TaskStopped(stop_code.clone()),
            Error::ReadinessTimeout { .. } => FailureKind::ReadinessTimeout,
            _ => FailureKind::Internal,
        }
    }
}

/// Result type using runner Error.
pub type Result<T> = std::result::Result<T, Error>;
