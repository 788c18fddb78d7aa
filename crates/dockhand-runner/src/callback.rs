// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow callback.
//!
//! The workflow step that invoked the orchestrator is parked on a callback
//! token. Failures found while provisioning or waiting for readiness are
//! reported through [`WorkflowCallback::send_failure`]; success is reported
//! by the worker itself once the job completes.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::ProviderError;

/// Error kind sent with a failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Invalid runner configuration. Never retried.
    Configuration,
    /// The backing VM could not be started.
    VmStartFailed,
    /// The container task could not be started.
    TaskStartFailed,
    /// The task stopped before becoming ready, with the scheduler stop code if any.
    TaskStopped(Option<String>),
    /// The worker never reported ready.
    ReadinessTimeout,
    /// Anything else (store or provider outage).
    Internal,
}

impl FailureKind {
    /// Wire name of the error kind.
    pub fn as_str(&self) -> &str {
        match self {
            FailureKind::Configuration => "RunnerConfigError",
            FailureKind::VmStartFailed => "VmFailedToStart",
            FailureKind::TaskStartFailed => "TaskFailedToStart",
            FailureKind::TaskStopped(Some(code)) => code,
            FailureKind::TaskStopped(None) => "TaskStopped",
            FailureKind::ReadinessTimeout => "RunnerReadinessTimeout",
            FailureKind::Internal => "RunnerError",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback API of the workflow engine.
#[async_trait]
pub trait WorkflowCallback: Send + Sync {
    /// Resume the parked step with `output`.
    async fn send_success(&self, token: &str, output: Value) -> Result<(), ProviderError>;

    /// Fail the parked step.
    async fn send_failure(
        &self,
        token: &str,
        error_kind: &str,
        cause: &str,
    ) -> Result<(), ProviderError>;
}

/// A callback captured by [`RecordingCallback`].
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackEvent {
    /// `send_success` was called.
    Success {
        /// Callback token.
        token: String,
        /// Output document.
        output: Value,
    },
    /// `send_failure` was called.
    Failure {
        /// Callback token.
        token: String,
        /// Error kind.
        error_kind: String,
        /// Cause text.
        cause: String,
    },
}

/// Callback that records every call, for tests.
#[derive(Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<CallbackEvent>>,
}

impl RecordingCallback {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All callbacks received so far.
    pub async fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().await.clone()
    }

    /// Failure reports received so far as `(error_kind, cause)`.
    pub async fn failures(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|event| match event {
                CallbackEvent::Failure {
                    error_kind, cause, ..
                } => Some((error_kind.clone(), cause.clone())),
                CallbackEvent::Success { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl WorkflowCallback for RecordingCallback {
    async fn send_success(&self, token: &str, output: Value) -> Result<(), ProviderError> {
        self.events.lock().await.push(CallbackEvent::Success {
            token: token.to_string(),
            output,
        });
        Ok(())
    }

    async fn send_failure(
        &self,
        token: &str,
        error_kind: &str,
        cause: &str,
    ) -> Result<(), ProviderError> {
        self.events.lock().await.push(CallbackEvent::Failure {
            token: token.to_string(),
            error_kind: error_kind.to_string(),
            cause: cause.to_string(),
        });
        Ok(())
    }
}
