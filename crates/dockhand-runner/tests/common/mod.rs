// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for dockhand-runner tests.
//!
//! Provides a `Harness` wiring the orchestrator to in-memory collaborators,
//! plus record fixtures and simulated workers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;

use dockhand_runner::callback::RecordingCallback;
use dockhand_runner::config::{Config, PollSchedule};
use dockhand_runner::error::ProviderError;
use dockhand_runner::invocation::RunnerInvocation;
use dockhand_runner::model::{
    Distribution, Fingerprinted, RunnerKey, RunnerRecord, TaskConfiguration, VmConfig, VmState,
};
use dockhand_runner::orchestrator::RunnerOrchestrator;
use dockhand_runner::queue::MockJobQueue;
use dockhand_runner::store::{MemoryStore, RunnerStore};
use dockhand_runner::task::MockContainerApi;
use dockhand_runner::vm::{MockParameterApi, MockVmApi};

pub const OWNER: &str = "demo";
pub const RUNNER: &str = "web";
pub const QUEUE_URL: &str = "https://queue.local/demo-web.fifo";

/// How often simulated workers look at the record.
const WORKER_POLL: Duration = Duration::from_millis(500);

/// Configuration with short schedules so timeouts are reached quickly.
pub fn test_config() -> Config {
    let mut config = Config::new("eu-west-1", "123456789012", "deploy-data", "resource-state");
    config.readiness = PollSchedule::new(10, Duration::from_secs(2));
    config.task_start = PollSchedule::new(5, Duration::from_secs(2));
    config.task_stop = PollSchedule::new(5, Duration::from_secs(2));
    config.vm_registration = PollSchedule::new(3, Duration::from_secs(2));
    config.dead_task_retry_delay = Duration::from_secs(1);
    config
}

pub fn key() -> RunnerKey {
    RunnerKey::new(OWNER, RUNNER)
}

pub fn task_configuration(task_definition: &str) -> TaskConfiguration {
    TaskConfiguration::from_json(
        &json!({
            "taskDefinition": task_definition,
            "subnets": ["subnet-a", "subnet-b"],
            "securityGroups": ["sg-runner"],
            "assignPublicIp": "DISABLED",
            "queueUrl": QUEUE_URL,
            "runnerConfiguration": {"maxConcurrentJobs": 2, "logLevel": "info"}
        }),
        RUNNER,
    )
    .unwrap()
}

pub fn vm_config(instance_type: &str) -> VmConfig {
    VmConfig::from_json(
        &json!({
            "instanceType": instance_type,
            "instanceProfile": "runner-profile",
            "logGroup": "/dockhand/demo-web"
        }),
        RUNNER,
    )
    .unwrap()
}

/// A serverless runner that has never been started.
pub fn serverless_record() -> RunnerRecord {
    RunnerRecord {
        key: key(),
        distribution: Distribution {
            id: "dist-1".into(),
            name: "platform".into(),
            environment: "dev".into(),
        },
        artifact_version: "v1".into(),
        task_id: None,
        container: None,
        task_definition: None,
        task_fingerprint: None,
        cluster: None,
        task_configuration: task_configuration("runner:1"),
        ready: false,
        started_by_execution: None,
        shutdown_hook_disabled: false,
        vm: None,
    }
}

/// A VM-backed runner that has never been started.
pub fn vm_record() -> RunnerRecord {
    RunnerRecord {
        vm: Some(VmState::new(vm_config("m5.large"))),
        ..serverless_record()
    }
}

/// `record` as it looks after a successful start of `task_id`
/// (and of `instance_id`, for VM-backed runners).
pub fn applied(mut record: RunnerRecord, task_id: &str, instance_id: &str) -> RunnerRecord {
    record.task_id = Some(task_id.to_string());
    record.task_definition = Some(record.task_configuration.task_definition.clone());
    record.task_fingerprint = Some(record.task_configuration.fingerprint());
    record.cluster = Some("dockhand-default".to_string());
    record.ready = true;
    if let Some(vm) = record.vm.as_mut() {
        vm.instance_id = Some(instance_id.to_string());
        vm.launched_fingerprint = Some(vm.config.fingerprint());
    }
    record
}

pub fn invocation(execution_id: &str) -> RunnerInvocation {
    RunnerInvocation {
        owner: OWNER.into(),
        runner: RUNNER.into(),
        execution_id: execution_id.into(),
        step_name: "Build".into(),
        callback_token: format!("token-{execution_id}"),
        job: json!({"commands": ["make test"]}),
    }
}

/// Orchestrator wired to in-memory collaborators.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MockJobQueue>,
    pub containers: Arc<MockContainerApi>,
    pub vms: Arc<MockVmApi>,
    pub parameters: Arc<MockParameterApi>,
    pub callback: Arc<RecordingCallback>,
    pub orchestrator: RunnerOrchestrator,
}

impl Harness {
    pub async fn new(record: RunnerRecord) -> Self {
        Self::with_parts(record, MockJobQueue::new(), MockContainerApi::new()).await
    }

    pub async fn with_parts(
        record: RunnerRecord,
        queue: MockJobQueue,
        containers: MockContainerApi,
    ) -> Self {
        let store = Arc::new(MemoryStore::with_records([record]).await);
        let queue = Arc::new(queue);
        let containers = Arc::new(containers);
        let vms = Arc::new(MockVmApi::new());
        let parameters = Arc::new(MockParameterApi::new());
        let callback = Arc::new(RecordingCallback::new());

        let orchestrator = RunnerOrchestrator::builder()
            .config(test_config())
            .store(store.clone())
            .queue(queue.clone())
            .containers(containers.clone())
            .vm_provisioning(vms.clone(), parameters.clone())
            .callback(callback.clone())
            .build()
            .unwrap();

        Self {
            store,
            queue,
            containers,
            vms,
            parameters,
            callback,
            orchestrator,
        }
    }

    pub async fn record(&self) -> RunnerRecord {
        self.store.get(&key()).await.unwrap()
    }

    /// Simulate the worker of the next task started after `previous`:
    /// it reports ready as soon as the record points at it.
    pub fn spawn_worker(&self, previous: Option<&str>) -> JoinHandle<Option<String>> {
        let store = self.store.clone();
        let previous = previous.map(str::to_string);
        tokio::spawn(async move {
            for _ in 0..200 {
                tokio::time::sleep(WORKER_POLL).await;
                let Some(record) = store.get(&key()).await else {
                    continue;
                };
                if let Some(task_id) = record.task_id
                    && Some(&task_id) != previous.as_ref()
                {
                    store.mark_ready(&key(), &task_id).await.unwrap();
                    return Some(task_id);
                }
            }
            None
        })
    }

    /// Simulate another execution taking over the slot once `task_id` is recorded.
    pub fn spawn_takeover(&self, task_id: &str, new_task_id: &str) -> JoinHandle<bool> {
        let store = self.store.clone();
        let task_id = task_id.to_string();
        let new_task_id = new_task_id.to_string();
        tokio::spawn(async move {
            for _ in 0..200 {
                tokio::time::sleep(WORKER_POLL).await;
                let Some(mut record) = store.get(&key()).await else {
                    continue;
                };
                if record.task_id.as_deref() == Some(task_id.as_str()) {
                    record.task_id = Some(new_task_id.clone());
                    record.started_by_execution = Some("exec-newer".to_string());
                    store.save(&record).await.unwrap();
                    return true;
                }
            }
            false
        })
    }

    /// Once `task_id` is recorded, fail every task describe with `code` for
    /// `outage`, then let the worker of `task_id` report ready.
    pub fn spawn_describe_outage(
        &self,
        task_id: &str,
        code: &str,
        outage: Duration,
    ) -> JoinHandle<bool> {
        let store = self.store.clone();
        let containers = self.containers.clone();
        let task_id = task_id.to_string();
        let code = code.to_string();
        tokio::spawn(async move {
            for _ in 0..200 {
                tokio::time::sleep(WORKER_POLL).await;
                let Some(record) = store.get(&key()).await else {
                    continue;
                };
                if record.task_id.as_deref() == Some(task_id.as_str()) {
                    containers
                        .set_describe_error(Some(ProviderError::new(code, "Rate exceeded")))
                        .await;
                    tokio::time::sleep(outage).await;
                    containers.set_describe_error(None).await;
                    return store.mark_ready(&key(), &task_id).await.unwrap();
                }
            }
            false
        })
    }

    /// Crash `task_id` once it is recorded, before its worker reports ready.
    pub fn spawn_crash(&self, task_id: &str, stop_code: &str) -> JoinHandle<()> {
        let store = self.store.clone();
        let containers = self.containers.clone();
        let task_id = task_id.to_string();
        let stop_code = stop_code.to_string();
        tokio::spawn(async move {
            for _ in 0..200 {
                tokio::time::sleep(WORKER_POLL).await;
                let Some(record) = store.get(&key()).await else {
                    continue;
                };
                if record.task_id.as_deref() == Some(task_id.as_str()) {
                    containers
                        .crash_task(&task_id, &stop_code, "Essential container in task exited")
                        .await;
                    return;
                }
            }
        })
    }
}
