// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container orchestration API.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::model::NetworkPlacement;

/// Raw task description from the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescription {
    /// Task id.
    pub task_id: String,
    /// Status the scheduler is driving the task towards.
    pub desired_status: String,
    /// Last observed status.
    pub last_status: Option<String>,
    /// Stop code.
    pub stop_code: Option<String>,
    /// Stop reason.
    pub stop_reason: Option<String>,
}

/// Where a task is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// On the runner's own VM, selected by a placement constraint.
    Vm {
        /// Placement constraint expression.
        placement_constraint: String,
    },
    /// Serverless capacity in the given network.
    Serverless {
        /// Network placement.
        network: NetworkPlacement,
        /// Platform version.
        platform_version: Option<String>,
    },
}

/// Everything needed to launch a worker task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLaunchRequest {
    /// Cluster.
    pub cluster: String,
    /// Task definition.
    pub task_definition: String,
    /// Placement.
    pub target: LaunchTarget,
    /// Container the overrides apply to.
    pub container: String,
    /// Entry command override.
    pub command: Vec<String>,
    /// Environment overrides.
    pub environment: BTreeMap<String, String>,
    /// CPU override.
    pub cpu: Option<u32>,
    /// Memory override.
    pub memory: Option<u32>,
    /// Task role override.
    pub role_arn: Option<String>,
    /// Value of the task's `startedBy` field.
    pub started_by: String,
}

/// Container orchestration service.
#[async_trait]
pub trait ContainerApi: Send + Sync {
    /// Launch one task and return its id.
    async fn run_task(&self, request: &TaskLaunchRequest) -> Result<String, ProviderError>;

    /// Describe a task. `Ok(None)` if the scheduler does not know it.
    async fn describe_task(
        &self,
        cluster: &str,
        task_id: &str,
    ) -> Result<Option<TaskDescription>, ProviderError>;

    /// Ask the scheduler to stop a task.
    async fn stop_task(&self, cluster: &str, task_id: &str, reason: &str)
    -> Result<(), ProviderError>;

    /// Container names declared by a task definition.
    async fn task_definition_containers(
        &self,
        task_definition: &str,
    ) -> Result<Vec<String>, ProviderError>;

    /// Whether a VM's container agent has registered with `cluster`.
    async fn is_instance_registered(
        &self,
        cluster: &str,
        instance_id: &str,
    ) -> Result<bool, ProviderError>;
}
