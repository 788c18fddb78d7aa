// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container task management.
//!
//! [`TaskManager`] launches, inspects and stops the containerized worker
//! through a [`ContainerApi`]. It owns the translation from a
//! [`RunnerRecord`] into a launch request (placement, environment, entry
//! command) and the classification of raw task descriptions into
//! [`TaskLifecycle`].

pub mod environment;
mod mock;
mod status;
mod traits;

pub use mock::{ContainerCall, MockContainerApi, StartBehavior};
pub use status::{TaskLifecycle, TaskStatus};
pub use traits::{ContainerApi, LaunchTarget, TaskDescription, TaskLaunchRequest};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Fingerprint, RunnerRecord};

/// Describe errors meaning "this task cannot exist here" rather than an outage.
///
/// Anything not listed propagates.
pub const DEAD_TASK_ERROR_CODES: &[&str] = &["InvalidParameterException", "ClusterNotFoundException"];

/// `startedBy` marker on launched tasks.
pub const STARTED_BY: &str = "dockhand-orchestrator";

/// Placement constraint pinning a task to the runner's own VM.
pub fn vm_placement_constraint(resource_name: &str) -> String {
    format!("attribute:runnerResourceName == {resource_name}")
}

/// Launches and inspects worker tasks.
pub struct TaskManager {
    api: Arc<dyn ContainerApi>,
    config: Arc<Config>,
}

impl TaskManager {
    /// Create a task manager.
    pub fn new(api: Arc<dyn ContainerApi>, config: Arc<Config>) -> Self {
        Self { api, config }
    }

    /// Container API in use.
    pub fn api(&self) -> &Arc<dyn ContainerApi> {
        &self.api
    }

    /// Current status of `task_id` in `cluster`. An absent id is dead.
    pub async fn describe_status(&self, task_id: Option<&str>, cluster: &str) -> Result<TaskStatus> {
        let Some(task_id) = task_id else {
            return Ok(TaskStatus::dead());
        };
        match self.api.describe_task(cluster, task_id).await {
            Ok(Some(description)) => Ok(TaskStatus::classify(&description)),
            Ok(None) => Ok(TaskStatus::dead()),
            Err(err) if err.is_any_of(DEAD_TASK_ERROR_CODES) => {
                info!(
                    task_id = %task_id,
                    cluster = %cluster,
                    code = %err.code,
                    "Task not found in cluster, treating it as dead"
                );
                Ok(TaskStatus::dead())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Ask the scheduler to stop a task. Does not wait.
    pub async fn stop(&self, task_id: &str, cluster: &str, reason: &str) -> Result<()> {
        info!(task_id = %task_id, cluster = %cluster, reason = %reason, "Stopping runner task");
        self.api.stop_task(cluster, task_id, reason).await?;
        Ok(())
    }

    /// Poll until the task is fully stopped.
    pub async fn wait_until_stopped(&self, task_id: &str, cluster: &str) -> Result<()> {
        let schedule = self.config.task_stop;
        for attempt in 1..=schedule.attempts {
            let status = self.describe_status(Some(task_id), cluster).await?;
            if status.is_fully_stopped() {
                debug!(task_id = %task_id, attempt, "Runner task stopped");
                return Ok(());
            }
            tokio::time::sleep(schedule.interval).await;
        }
        Err(Error::StopTimeout(task_id.to_string()))
    }

    /// Container the launch overrides apply to.
    ///
    /// The record's override wins; otherwise the task definition must declare
    /// exactly one container.
    pub async fn resolve_container(&self, record: &RunnerRecord) -> Result<String> {
        if let Some(container) = &record.container {
            return Ok(container.clone());
        }
        let task_definition = &record.task_configuration.task_definition;
        let containers = self
            .api
            .task_definition_containers(task_definition)
            .await
            .map_err(|e| Error::TaskStartFailed(e.to_string()))?;
        match containers.as_slice() {
            [container] => Ok(container.clone()),
            _ => Err(Error::Configuration(format!(
                "Task definition {task_definition} for runner {} has {} containers, \
                 the runner must name the container to use",
                record.key.runner,
                containers.len()
            ))),
        }
    }

    /// Build the launch request for a worker serving `record`.
    pub async fn launch_request(
        &self,
        record: &RunnerRecord,
        fingerprint: Fingerprint,
        callback_token: &str,
    ) -> Result<TaskLaunchRequest> {
        let task = &record.task_configuration;
        let target = if record.has_vm() {
            LaunchTarget::Vm {
                placement_constraint: vm_placement_constraint(&record.key.resource_name()),
            }
        } else {
            LaunchTarget::Serverless {
                network: task.network.clone(),
                platform_version: task.platform_version.clone(),
            }
        };

        Ok(TaskLaunchRequest {
            cluster: self
                .config
                .cluster_or_default(task.cluster.as_deref())
                .to_string(),
            task_definition: task.task_definition.clone(),
            target,
            container: self.resolve_container(record).await?,
            command: environment::bootstrap_command(&self.config, callback_token),
            environment: environment::worker_environment(&self.config, record, fingerprint),
            cpu: task.cpu,
            memory: task.memory,
            role_arn: task.role_arn.clone(),
            started_by: STARTED_BY.to_string(),
        })
    }

    /// Launch a worker task and return its id.
    pub async fn start(
        &self,
        record: &RunnerRecord,
        fingerprint: Fingerprint,
        callback_token: &str,
    ) -> Result<String> {
        let request = self.launch_request(record, fingerprint, callback_token).await?;
        let task_id = self
            .api
            .run_task(&request)
            .await
            .map_err(|e| Error::TaskStartFailed(e.to_string()))?;
        info!(
            runner = %record.key,
            task_id = %task_id,
            cluster = %request.cluster,
            on_vm = record.has_vm(),
            "Runner task launched"
        );
        Ok(task_id)
    }

    /// Wait for a freshly launched task to reach `running`.
    ///
    /// A task can read as dead for a moment after launch, so a dead result is
    /// re-checked once after [`Config::dead_task_retry_delay`].
    pub async fn wait_until_running(&self, task_id: &str, cluster: &str) -> Result<()> {
        let mut status = self.describe_status(Some(task_id), cluster).await?;
        if status.lifecycle == TaskLifecycle::Dead {
            tokio::time::sleep(self.config.dead_task_retry_delay).await;
            status = self.describe_status(Some(task_id), cluster).await?;
        }

        let schedule = self.config.task_start;
        let mut attempts = 0;
        while status.is_starting() && attempts < schedule.attempts {
            tokio::time::sleep(schedule.interval).await;
            status = self.describe_status(Some(task_id), cluster).await?;
            attempts += 1;
        }

        match status.lifecycle {
            TaskLifecycle::Running => Ok(()),
            TaskLifecycle::Dead => Err(Error::TaskStartFailed(format!(
                "task {task_id} is not known to cluster {cluster}"
            ))),
            TaskLifecycle::Starting => {
                warn!(task_id = %task_id, "Runner task still starting after the start schedule");
                Err(Error::TaskStartFailed(format!(
                    "task {task_id} did not leave {} within {}s",
                    status.last_status.as_deref().unwrap_or("PROVISIONING"),
                    schedule.ceiling().as_secs()
                )))
            }
            TaskLifecycle::StoppingOrStopped => Err(Error::TaskStopped {
                stop_code: status.stop_code,
                stop_reason: status.stop_reason,
            }),
        }
    }
}
