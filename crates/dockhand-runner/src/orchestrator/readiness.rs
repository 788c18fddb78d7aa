// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Readiness wait after a fresh task start.
//!
//! Readiness has two tiers: the scheduler's view of the task
//! ([`TaskLifecycle`](crate::task::TaskLifecycle)) and the worker's own ready
//! flag on the record ([`AppReadiness`]). Each poll checks, in order:
//!
//! 1. the record still points at our task (else we were superseded),
//! 2. the worker reported ready,
//! 3. the scheduler has not stopped the task.
//!
//! Status lookup errors count as "still pending"; the schedule's ceiling
//! bounds the wait either way.

use tracing::{debug, info, warn};

use super::{Outcome, RunnerOrchestrator};
use crate::error::{Error, Result};
use crate::model::{AppReadiness, RunnerKey};
use crate::task::TaskStatus;

/// Stop reason for a task superseded while starting.
pub const SUPERSEDED_REASON: &str = "Superseded by a newer runner task";
/// Stop reason for a task whose worker never reported ready.
pub const READINESS_TIMEOUT_REASON: &str = "Runner did not become ready in time";
/// Stop reason for a task that never reached running.
pub const START_FAILED_REASON: &str = "Runner task failed to start";

enum Observation {
    Pending,
    Ready,
    Superseded { current: Option<String> },
    Stopped(TaskStatus),
}

impl RunnerOrchestrator {
    async fn observe(&self, key: &RunnerKey, task_id: &str, cluster: &str) -> Result<Observation> {
        let record = self.store.load(key).await?;
        if record.task_id.as_deref() != Some(task_id) {
            return Ok(Observation::Superseded {
                current: record.task_id,
            });
        }
        if record.readiness() == AppReadiness::Ready {
            return Ok(Observation::Ready);
        }
        match self.tasks.describe_status(Some(task_id), cluster).await {
            Ok(status) if status.is_stopping_or_stopped() => Ok(Observation::Stopped(status)),
            Ok(_) => Ok(Observation::Pending),
            Err(err) => {
                warn!(
                    task_id = %task_id,
                    error = %err,
                    "Task status check failed during readiness wait, retrying"
                );
                Ok(Observation::Pending)
            }
        }
    }

    /// Poll until the worker of `task_id` reports ready.
    pub(super) async fn await_readiness(
        &self,
        key: &RunnerKey,
        task_id: &str,
        cluster: &str,
    ) -> Result<Outcome> {
        let schedule = self.config.readiness;
        for attempt in 1..=schedule.attempts {
            tokio::time::sleep(schedule.interval).await;
            match self.observe(key, task_id, cluster).await? {
                Observation::Ready => {
                    info!(runner = %key, task_id = %task_id, attempt, "Runner is ready");
                    return Ok(Outcome::Ready {
                        task_id: task_id.to_string(),
                    });
                }
                Observation::Superseded { current } => {
                    info!(
                        runner = %key,
                        task_id = %task_id,
                        current_task_id = ?current,
                        "Runner task superseded while starting, stopping it"
                    );
                    if let Err(err) = self.tasks.stop(task_id, cluster, SUPERSEDED_REASON).await {
                        warn!(task_id = %task_id, error = %err, "Failed to stop superseded task");
                    }
                    return Ok(Outcome::Superseded {
                        stopped_task_id: task_id.to_string(),
                        current_task_id: current,
                    });
                }
                Observation::Stopped(status) => {
                    return Err(Error::TaskStopped {
                        stop_code: status.stop_code,
                        stop_reason: status.stop_reason,
                    });
                }
                Observation::Pending => {
                    debug!(runner = %key, task_id = %task_id, attempt, "Waiting for runner to become ready");
                }
            }
        }

        warn!(runner = %key, task_id = %task_id, "Runner did not become ready, stopping task");
        if let Err(err) = self
            .tasks
            .stop(task_id, cluster, READINESS_TIMEOUT_REASON)
            .await
        {
            warn!(task_id = %task_id, error = %err, "Failed to stop task after readiness timeout");
        }
        Err(Error::ReadinessTimeout {
            task_id: task_id.to_string(),
            waited_secs: schedule.ceiling().as_secs(),
        })
    }
}
