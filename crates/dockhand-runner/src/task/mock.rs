// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock container API for testing.
//!
//! Simulates a scheduler: tasks move through their statuses as they are
//! described, and every call is recorded in order so tests can assert on
//! sequencing (stop, then observed stopped, then start).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;
use crate::error::ProviderError;

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerCall {
    /// `run_task`.
    RunTask(TaskLaunchRequest),
    /// `describe_task`.
    Describe {
        /// Cluster.
        cluster: String,
        /// Task id.
        task_id: String,
    },
    /// `stop_task`.
    Stop {
        /// Cluster.
        cluster: String,
        /// Task id.
        task_id: String,
        /// Reason.
        reason: String,
    },
    /// `task_definition_containers`.
    DescribeTaskDefinition(String),
    /// `is_instance_registered`.
    IsInstanceRegistered(String),
}

/// How newly launched tasks behave.
#[derive(Debug, Clone)]
pub enum StartBehavior {
    /// Report `PROVISIONING` for this many describes, then `RUNNING`.
    StartAfter(u32),
    /// Stop on their own with this code and reason.
    FailToStart {
        /// Stop code.
        stop_code: String,
        /// Stop reason.
        stop_reason: String,
    },
    /// `run_task` itself fails.
    Reject(ProviderError),
}

#[derive(Debug)]
struct MockTask {
    description: TaskDescription,
    describes_until_running: Option<u32>,
    describes_until_stopped: Option<u32>,
}

struct State {
    calls: Vec<ContainerCall>,
    tasks: HashMap<String, MockTask>,
    next_id: u32,
    start_behavior: StartBehavior,
    stop_lag: u32,
    describe_error: Option<ProviderError>,
    containers: Vec<String>,
    registered_after: Option<u32>,
}

/// Mock container API.
pub struct MockContainerApi {
    state: Mutex<State>,
}

impl Default for MockContainerApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockContainerApi {
    /// Scheduler where tasks start immediately and stop after one more describe.
    pub fn new() -> Self {
        Self::with_behavior(StartBehavior::StartAfter(0))
    }

    /// Scheduler where new tasks behave as `behavior`.
    pub fn with_behavior(behavior: StartBehavior) -> Self {
        Self {
            state: Mutex::new(State {
                calls: Vec::new(),
                tasks: HashMap::new(),
                next_id: 1,
                start_behavior: behavior,
                stop_lag: 1,
                describe_error: None,
                containers: vec!["runner".to_string()],
                registered_after: Some(0),
            }),
        }
    }

    /// Change the behavior of tasks launched from now on.
    pub async fn set_start_behavior(&self, behavior: StartBehavior) {
        self.state.lock().await.start_behavior = behavior;
    }

    /// Describes a stopped task spends in `DEPROVISIONING`.
    pub async fn set_stop_lag(&self, describes: u32) {
        self.state.lock().await.stop_lag = describes;
    }

    /// Make every describe fail with `error` (or succeed again with `None`).
    pub async fn set_describe_error(&self, error: Option<ProviderError>) {
        self.state.lock().await.describe_error = error;
    }

    /// Containers declared by every task definition.
    pub async fn set_containers(&self, containers: Vec<String>) {
        self.state.lock().await.containers = containers;
    }

    /// Number of registration checks before instances report registered;
    /// `None` never registers.
    pub async fn set_registered_after(&self, checks: Option<u32>) {
        self.state.lock().await.registered_after = checks;
    }

    /// Seed a running task.
    pub async fn insert_running_task(&self, task_id: &str) {
        self.state.lock().await.tasks.insert(
            task_id.to_string(),
            MockTask {
                description: TaskDescription {
                    task_id: task_id.to_string(),
                    desired_status: "RUNNING".to_string(),
                    last_status: Some("RUNNING".to_string()),
                    stop_code: None,
                    stop_reason: None,
                },
                describes_until_running: None,
                describes_until_stopped: None,
            },
        );
    }

    /// Stop a task out of band, as if it crashed.
    pub async fn crash_task(&self, task_id: &str, stop_code: &str, stop_reason: &str) {
        if let Some(task) = self.state.lock().await.tasks.get_mut(task_id) {
            task.description.desired_status = "STOPPED".to_string();
            task.description.last_status = Some("STOPPED".to_string());
            task.description.stop_code = Some(stop_code.to_string());
            task.description.stop_reason = Some(stop_reason.to_string());
            task.describes_until_running = None;
            task.describes_until_stopped = None;
        }
    }

    /// Every call so far.
    pub async fn calls(&self) -> Vec<ContainerCall> {
        self.state.lock().await.calls.clone()
    }

    /// Launch requests so far.
    pub async fn launches(&self) -> Vec<TaskLaunchRequest> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                ContainerCall::RunTask(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    /// Ids of tasks stopped so far.
    pub async fn stopped_task_ids(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                ContainerCall::Stop { task_id, .. } => Some(task_id),
                _ => None,
            })
            .collect()
    }

    /// Current description of a task.
    pub async fn task(&self, task_id: &str) -> Option<TaskDescription> {
        self.state
            .lock()
            .await
            .tasks
            .get(task_id)
            .map(|t| t.description.clone())
    }
}

#[async_trait]
impl ContainerApi for MockContainerApi {
    async fn run_task(&self, request: &TaskLaunchRequest) -> Result<String, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.push(ContainerCall::RunTask(request.clone()));

        let task_id = format!("task-{}", state.next_id);
        let task = match state.start_behavior.clone() {
            StartBehavior::Reject(error) => return Err(error),
            StartBehavior::StartAfter(describes) => MockTask {
                description: TaskDescription {
                    task_id: task_id.clone(),
                    desired_status: "RUNNING".to_string(),
                    last_status: Some("PROVISIONING".to_string()),
                    stop_code: None,
                    stop_reason: None,
                },
                describes_until_running: Some(describes),
                describes_until_stopped: None,
            },
            StartBehavior::FailToStart {
                stop_code,
                stop_reason,
            } => MockTask {
                description: TaskDescription {
                    task_id: task_id.clone(),
                    desired_status: "STOPPED".to_string(),
                    last_status: Some("STOPPED".to_string()),
                    stop_code: Some(stop_code),
                    stop_reason: Some(stop_reason),
                },
                describes_until_running: None,
                describes_until_stopped: None,
            },
        };
        state.next_id += 1;
        state.tasks.insert(task_id.clone(), task);
        Ok(task_id)
    }

    async fn describe_task(
        &self,
        cluster: &str,
        task_id: &str,
    ) -> Result<Option<TaskDescription>, ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.push(ContainerCall::Describe {
            cluster: cluster.to_string(),
            task_id: task_id.to_string(),
        });
        if let Some(error) = &state.describe_error {
            return Err(error.clone());
        }
        let Some(task) = state.tasks.get_mut(task_id) else {
            return Ok(None);
        };

        if let Some(remaining) = task.describes_until_stopped {
            if remaining == 0 {
                task.description.last_status = Some("STOPPED".to_string());
                task.describes_until_stopped = None;
            } else {
                task.describes_until_stopped = Some(remaining - 1);
            }
        } else if let Some(remaining) = task.describes_until_running {
            if remaining == 0 {
                task.description.last_status = Some("RUNNING".to_string());
                task.describes_until_running = None;
            } else {
                task.describes_until_running = Some(remaining - 1);
            }
        }
        Ok(Some(task.description.clone()))
    }

    async fn stop_task(
        &self,
        cluster: &str,
        task_id: &str,
        reason: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        state.calls.push(ContainerCall::Stop {
            cluster: cluster.to_string(),
            task_id: task_id.to_string(),
            reason: reason.to_string(),
        });
        let lag = state.stop_lag;
        if let Some(task) = state.tasks.get_mut(task_id)
            && task.description.desired_status != "STOPPED"
        {
            task.description.desired_status = "STOPPED".to_string();
            task.description.last_status = Some("DEPROVISIONING".to_string());
            task.description.stop_code = Some("UserInitiated".to_string());
            task.description.stop_reason = Some(reason.to_string());
            task.describes_until_running = None;
            task.describes_until_stopped = Some(lag);
        }
        Ok(())
    }

    async fn task_definition_containers(
        &self,
        task_definition: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(ContainerCall::DescribeTaskDefinition(task_definition.to_string()));
        Ok(state.containers.clone())
    }

    async fn is_instance_registered(
        &self,
        _cluster: &str,
        instance_id: &str,
    ) -> Result<bool, ProviderError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(ContainerCall::IsInstanceRegistered(instance_id.to_string()));
        match state.registered_after {
            Some(0) => Ok(true),
            Some(n) => {
                state.registered_after = Some(n - 1);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request() -> TaskLaunchRequest {
        TaskLaunchRequest {
            cluster: "c".into(),
            task_definition: "td".into(),
            target: LaunchTarget::Vm {
                placement_constraint: "attribute:runnerResourceName == demo-web".into(),
            },
            container: "runner".into(),
            command: vec![],
            environment: BTreeMap::new(),
            cpu: None,
            memory: None,
            role_arn: None,
            started_by: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_task_progresses_to_running() {
        let api = MockContainerApi::with_behavior(StartBehavior::StartAfter(1));
        let id = api.run_task(&request()).await.unwrap();
        let first = api.describe_task("c", &id).await.unwrap().unwrap();
        assert_eq!(first.last_status.as_deref(), Some("PROVISIONING"));
        let second = api.describe_task("c", &id).await.unwrap().unwrap();
        assert_eq!(second.last_status.as_deref(), Some("RUNNING"));
    }

    #[tokio::test]
    async fn test_stop_lags_one_describe() {
        let api = MockContainerApi::new();
        api.insert_running_task("t-1").await;
        api.stop_task("c", "t-1", "replaced").await.unwrap();
        let first = api.describe_task("c", "t-1").await.unwrap().unwrap();
        assert_eq!(first.last_status.as_deref(), Some("DEPROVISIONING"));
        let second = api.describe_task("c", "t-1").await.unwrap().unwrap();
        assert_eq!(second.last_status.as_deref(), Some("STOPPED"));
    }

    #[tokio::test]
    async fn test_unknown_task_describes_as_none() {
        let api = MockContainerApi::new();
        assert!(api.describe_task("c", "nope").await.unwrap().is_none());
    }
}
