// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Builder wiring the orchestrator's collaborators.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dockhand_runner::config::Config;
//! use dockhand_runner::orchestrator::RunnerOrchestrator;
//! use dockhand_runner::queue::PostgresJobQueue;
//! use dockhand_runner::store::PostgresStore;
//!
//! let orchestrator = RunnerOrchestrator::builder()
//!     .config(Config::from_env()?)
//!     .store(Arc::new(PostgresStore::new(pool.clone())))
//!     .queue(Arc::new(PostgresJobQueue::new(pool)))
//!     .containers(containers)
//!     .vm_provisioning(vm_api, parameters)   // optional, serverless-only without it
//!     .callback(callback)
//!     .build()?;
//! ```

use std::sync::Arc;

use anyhow::{Result, anyhow};

use super::RunnerOrchestrator;
use crate::callback::WorkflowCallback;
use crate::config::Config;
use crate::queue::JobQueue;
use crate::store::RunnerStore;
use crate::task::{ContainerApi, TaskManager};
use crate::vm::{ParameterApi, VmApi, VmManager};

/// Builder for a [`RunnerOrchestrator`].
#[derive(Default)]
pub struct RunnerOrchestratorBuilder {
    config: Option<Arc<Config>>,
    store: Option<Arc<dyn RunnerStore>>,
    queue: Option<Arc<dyn JobQueue>>,
    containers: Option<Arc<dyn ContainerApi>>,
    vm_api: Option<Arc<dyn VmApi>>,
    parameters: Option<Arc<dyn ParameterApi>>,
    callback: Option<Arc<dyn WorkflowCallback>>,
}

impl RunnerOrchestratorBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration (required).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(Arc::new(config));
        self
    }

    /// Set an already shared configuration.
    pub fn shared_config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the runner store (required).
    pub fn store(mut self, store: Arc<dyn RunnerStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the job queue (required).
    pub fn queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the container API (required).
    pub fn containers(mut self, containers: Arc<dyn ContainerApi>) -> Self {
        self.containers = Some(containers);
        self
    }

    /// Enable VM-backed runners.
    pub fn vm_provisioning(
        mut self,
        vm_api: Arc<dyn VmApi>,
        parameters: Arc<dyn ParameterApi>,
    ) -> Self {
        self.vm_api = Some(vm_api);
        self.parameters = Some(parameters);
        self
    }

    /// Set the workflow callback (required).
    pub fn callback(mut self, callback: Arc<dyn WorkflowCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> Result<RunnerOrchestrator> {
        let config = self.config.ok_or_else(|| anyhow!("config is required"))?;
        let store = self.store.ok_or_else(|| anyhow!("store is required"))?;
        let queue = self.queue.ok_or_else(|| anyhow!("queue is required"))?;
        let containers = self
            .containers
            .ok_or_else(|| anyhow!("container API is required"))?;
        let callback = self
            .callback
            .ok_or_else(|| anyhow!("workflow callback is required"))?;

        let vms = match (self.vm_api, self.parameters) {
            (Some(vm_api), Some(parameters)) => Some(VmManager::new(
                vm_api,
                parameters,
                containers.clone(),
                config.clone(),
            )),
            _ => None,
        };

        Ok(RunnerOrchestrator {
            tasks: TaskManager::new(containers, config.clone()),
            config,
            store,
            queue,
            vms,
            callback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::RecordingCallback;
    use crate::queue::MockJobQueue;
    use crate::store::MemoryStore;
    use crate::task::MockContainerApi;

    #[test]
    fn test_build_requires_store() {
        let result = RunnerOrchestratorBuilder::new()
            .config(Config::new("r", "a", "d", "s"))
            .queue(Arc::new(MockJobQueue::new()))
            .containers(Arc::new(MockContainerApi::new()))
            .callback(Arc::new(RecordingCallback::new()))
            .build();
        let err = result.err().map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("store is required"));
    }

    #[test]
    fn test_build_without_vm_provisioning() {
        let orchestrator = RunnerOrchestratorBuilder::new()
            .config(Config::new("r", "a", "d", "s"))
            .store(Arc::new(MemoryStore::new()))
            .queue(Arc::new(MockJobQueue::new()))
            .containers(Arc::new(MockContainerApi::new()))
            .callback(Arc::new(RecordingCallback::new()))
            .build()
            .unwrap();
        assert!(orchestrator.vms.is_none());
    }
}
