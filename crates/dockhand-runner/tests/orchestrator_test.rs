// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests of the runner orchestrator against in-memory collaborators.
//!
//! All tests run with a paused clock, so poll schedules elapse instantly.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use dockhand_runner::Outcome;
use dockhand_runner::callback::FailureKind;
use dockhand_runner::error::ProviderError;
use dockhand_runner::model::{Fingerprint, Fingerprinted, VmConfig, VmState};
use dockhand_runner::orchestrator::RunnerOrchestrator;
use dockhand_runner::queue::{MockJobQueue, dedup_key};
use dockhand_runner::store::{LockField, MemoryStore, RunnerStore};
use dockhand_runner::task::{ContainerCall, LaunchTarget, MockContainerApi, StartBehavior};
use dockhand_runner::vm::{InstanceState, MockVmApi, VmApi, VmCall, VmLaunchRequest};
use serde_json::json;
use tokio::sync::Mutex;

fn position(calls: &[ContainerCall], wanted: impl Fn(&ContainerCall) -> bool) -> usize {
    calls.iter().position(wanted).unwrap()
}

fn describes_of(calls: &[ContainerCall], task_id: &str) -> usize {
    calls
        .iter()
        .filter(|c| matches!(c, ContainerCall::Describe { task_id: id, .. } if id == task_id))
        .count()
}

/// `record` with a different desired task definition than the one applied.
fn with_new_task_definition(mut record: dockhand_runner::model::RunnerRecord) -> dockhand_runner::model::RunnerRecord {
    record.task_configuration = task_configuration("runner:2");
    record
}

#[tokio::test(start_paused = true)]
async fn test_first_invocation_starts_serverless_task() {
    let h = Harness::new(serverless_record()).await;
    let worker = h.spawn_worker(None);

    let outcome = h.orchestrator.handle(&invocation("exec-1")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Ready {
            task_id: "task-1".to_string()
        }
    );
    assert_eq!(worker.await.unwrap().as_deref(), Some("task-1"));

    let launches = h.containers.launches().await;
    assert_eq!(launches.len(), 1);
    let launch = &launches[0];
    assert_eq!(launch.cluster, "dockhand-default");
    assert_eq!(launch.task_definition, "runner:1");
    assert_eq!(launch.container, "runner");
    assert!(matches!(launch.target, LaunchTarget::Serverless { .. }));
    assert_eq!(launch.command.last().map(String::as_str), Some("token-exec-1"));
    assert_eq!(
        launch.environment["DOCKHAND_CONFIGURATION_FINGERPRINT"],
        serverless_record().desired_fingerprint().to_string()
    );

    let record = h.record().await;
    assert_eq!(record.task_id.as_deref(), Some("task-1"));
    assert_eq!(record.task_definition.as_deref(), Some("runner:1"));
    assert_eq!(record.cluster.as_deref(), Some("dockhand-default"));
    assert_eq!(
        record.task_fingerprint,
        Some(record.task_configuration.fingerprint())
    );
    assert!(record.ready);
    assert_eq!(record.started_by_execution.as_deref(), Some("exec-1"));

    assert!(h.vms.calls().await.is_empty());
    assert!(h.callback.events().await.is_empty());
    assert_eq!(h.store.lock_holder(&key(), LockField::TaskStart).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_job_is_enqueued_once_per_step() {
    let h = Harness::new(serverless_record()).await;
    h.spawn_worker(None);

    h.orchestrator.handle(&invocation("exec-1")).await.unwrap();
    let second = h.orchestrator.handle(&invocation("exec-1")).await.unwrap();

    assert_eq!(
        second,
        Outcome::Reused {
            task_id: "task-1".to_string()
        }
    );
    let messages = h.queue.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].queue_url, QUEUE_URL);
    assert_eq!(messages[0].dedup_id, dedup_key("exec-1", "Build"));
    assert_eq!(messages[0].group_id, messages[0].dedup_id);
    assert_eq!(messages[0].body["job"], json!({"commands": ["make test"]}));
    assert_eq!(
        messages[0].body["configurationFingerprint"],
        serverless_record().desired_fingerprint().as_i64()
    );
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_running_task_is_reused() {
    let h = Harness::new(applied(serverless_record(), "task-9", "")).await;
    h.containers.insert_running_task("task-9").await;

    let outcome = h.orchestrator.handle(&invocation("exec-2")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Reused {
            task_id: "task-9".to_string()
        }
    );
    assert!(h.containers.launches().await.is_empty());
    assert!(h.containers.stopped_task_ids().await.is_empty());
    assert_eq!(h.queue.messages().await.len(), 1);
    assert!(h.record().await.ready);
}

#[tokio::test(start_paused = true)]
async fn test_dead_task_is_replaced() {
    // task-9 is recorded but unknown to the scheduler.
    let h = Harness::new(applied(serverless_record(), "task-9", "")).await;
    h.spawn_worker(Some("task-9"));

    let outcome = h.orchestrator.handle(&invocation("exec-2")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Ready {
            task_id: "task-1".to_string()
        }
    );
    assert!(h.containers.stopped_task_ids().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stopped_task_is_replaced() {
    let h = Harness::new(applied(serverless_record(), "task-9", "")).await;
    h.containers.insert_running_task("task-9").await;
    h.containers
        .crash_task("task-9", "EssentialContainerExited", "exit 1")
        .await;
    h.spawn_worker(Some("task-9"));

    let outcome = h.orchestrator.handle(&invocation("exec-2")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Ready {
            task_id: "task-1".to_string()
        }
    );
    assert_eq!(h.containers.launches().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_changed_configuration_on_vm_stops_before_starting() {
    let record = with_new_task_definition(applied(vm_record(), "task-9", "i-existing"));
    let h = Harness::new(record).await;
    h.vms.insert_instance("i-existing", InstanceState::Running).await;
    h.containers.insert_running_task("task-9").await;
    h.spawn_worker(Some("task-9"));

    let outcome = h.orchestrator.handle(&invocation("exec-3")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Ready {
            task_id: "task-1".to_string()
        }
    );

    let calls = h.containers.calls().await;
    let stop = position(&calls, |c| {
        matches!(c, ContainerCall::Stop { task_id, .. } if task_id == "task-9")
    });
    let run = position(&calls, |c| matches!(c, ContainerCall::RunTask(_)));
    assert!(stop < run);
    // One describe sees DEPROVISIONING, the next sees STOPPED.
    assert_eq!(describes_of(&calls[stop..run], "task-9"), 2);
    assert_eq!(
        h.containers
            .task("task-9")
            .await
            .and_then(|t| t.last_status),
        Some("STOPPED".to_string())
    );

    // The VM matched its configuration and was reused.
    assert!(h.vms.launches().await.is_empty());
    assert!(h.vms.terminated().await.is_empty());

    let launches = h.containers.launches().await;
    assert_eq!(launches[0].task_definition, "runner:2");
    assert_eq!(
        launches[0].target,
        LaunchTarget::Vm {
            placement_constraint: "attribute:runnerResourceName == demo-web".to_string()
        }
    );
    assert_eq!(launches[0].environment["DOCKHAND_VM_INSTANCE_ID"], "i-existing");

    let record = h.record().await;
    assert!(!record.shutdown_hook_disabled);
    assert_eq!(record.task_definition.as_deref(), Some("runner:2"));
}

#[tokio::test(start_paused = true)]
async fn test_changed_configuration_without_vm_does_not_wait_for_stop() {
    let record = with_new_task_definition(applied(serverless_record(), "task-9", ""));
    let h = Harness::new(record).await;
    h.containers.insert_running_task("task-9").await;
    h.containers.set_stop_lag(100).await;
    h.spawn_worker(Some("task-9"));

    let outcome = h.orchestrator.handle(&invocation("exec-3")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Ready {
            task_id: "task-1".to_string()
        }
    );
    let calls = h.containers.calls().await;
    let stop = position(&calls, |c| matches!(c, ContainerCall::Stop { .. }));
    let run = position(&calls, |c| matches!(c, ContainerCall::RunTask(_)));
    assert!(stop < run);
    assert_eq!(describes_of(&calls[stop..run], "task-9"), 0);
    assert!(!h.record().await.shutdown_hook_disabled);
}

#[tokio::test(start_paused = true)]
async fn test_first_vm_invocation_launches_vm_then_task() {
    let h = Harness::new(vm_record()).await;
    h.spawn_worker(None);

    let outcome = h.orchestrator.handle(&invocation("exec-1")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Ready {
            task_id: "task-1".to_string()
        }
    );

    let launches = h.vms.launches().await;
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].image_id, "ami-amazonlinux2");
    assert_eq!(launches[0].instance_type, "m5.large");
    assert_eq!(launches[0].subnet_id, "subnet-a");
    assert_eq!(launches[0].root_volume_gib, 50);

    let record = h.record().await;
    let vm = record.vm.as_ref().unwrap();
    assert_eq!(vm.instance_id.as_deref(), Some("i-00000001"));
    assert_eq!(vm.launched_fingerprint, Some(vm.config.fingerprint()));
    assert_eq!(
        h.vms.instance("i-00000001").await,
        Some(InstanceState::Running)
    );
    assert_eq!(h.store.lock_holder(&key(), LockField::VmStart).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_stopped_vm_is_relaunched() {
    let h = Harness::new(applied(vm_record(), "task-9", "i-old")).await;
    h.vms.insert_instance("i-old", InstanceState::Stopped).await;
    h.spawn_worker(Some("task-9"));

    let outcome = h.orchestrator.handle(&invocation("exec-4")).await.unwrap();

    assert!(matches!(outcome, Outcome::Ready { .. }));
    assert_eq!(h.vms.launches().await.len(), 1);
    assert!(h.vms.terminated().await.is_empty());
    let record = h.record().await;
    assert_eq!(
        record.vm.and_then(|vm| vm.instance_id).as_deref(),
        Some("i-00000001")
    );
}

#[tokio::test(start_paused = true)]
async fn test_vm_configuration_change_replaces_vm() {
    let mut record = applied(vm_record(), "task-9", "i-old");
    record.vm = Some(VmState {
        config: vm_config("m5.xlarge"),
        instance_id: Some("i-old".to_string()),
        launched_fingerprint: Some(vm_config("m5.large").fingerprint()),
    });
    let h = Harness::new(record).await;
    h.vms.insert_instance("i-old", InstanceState::Running).await;
    h.containers.insert_running_task("task-9").await;
    h.spawn_worker(Some("task-9"));

    let outcome = h.orchestrator.handle(&invocation("exec-5")).await.unwrap();

    assert!(matches!(outcome, Outcome::Ready { .. }));
    let calls = h.vms.calls().await;
    let terminate = calls
        .iter()
        .position(|c| *c == VmCall::Terminate("i-old".to_string()))
        .unwrap();
    let waited = calls
        .iter()
        .position(|c| *c == VmCall::WaitTerminated("i-old".to_string()))
        .unwrap();
    let launch = calls
        .iter()
        .position(|c| matches!(c, VmCall::RunInstance(_)))
        .unwrap();
    assert!(terminate < waited && waited < launch);
    assert_eq!(h.vms.launches().await[0].instance_type, "m5.xlarge");

    // The VM fingerprint is part of the configuration, so the task is replaced too.
    assert_eq!(h.containers.stopped_task_ids().await, vec!["task-9"]);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_task_is_stopped_without_failure() {
    let h = Harness::new(serverless_record()).await;
    let takeover = h.spawn_takeover("task-1", "task-newer");

    let outcome = h.orchestrator.handle(&invocation("exec-6")).await.unwrap();

    assert!(takeover.await.unwrap());
    assert_eq!(
        outcome,
        Outcome::Superseded {
            stopped_task_id: "task-1".to_string(),
            current_task_id: Some("task-newer".to_string()),
        }
    );
    assert_eq!(h.containers.stopped_task_ids().await, vec!["task-1"]);
    assert!(h.callback.failures().await.is_empty());
    assert_eq!(h.record().await.task_id.as_deref(), Some("task-newer"));
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_stops_task_and_terminates_vm() {
    let h = Harness::new(vm_record()).await;

    let outcome = h.orchestrator.handle(&invocation("exec-7")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::ReadinessTimeout
        }
    );
    assert_eq!(h.containers.stopped_task_ids().await, vec!["task-1"]);
    assert_eq!(h.vms.terminated().await, vec!["i-00000001"]);

    let failures = h.callback.failures().await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "RunnerReadinessTimeout");
    assert!(failures[0].1.contains("task-1"));
    assert_eq!(h.store.lock_holder(&key(), LockField::TaskStart).await, None);
    assert_eq!(h.store.lock_holder(&key(), LockField::VmStart).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_reused_vm_is_not_terminated_on_failure() {
    let h = Harness::new(applied(vm_record(), "task-9", "i-existing")).await;
    h.vms.insert_instance("i-existing", InstanceState::Running).await;

    let outcome = h.orchestrator.handle(&invocation("exec-7")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::ReadinessTimeout
        }
    );
    assert!(h.vms.terminated().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_task_that_fails_to_start_reports_stop_code() {
    let containers = MockContainerApi::with_behavior(StartBehavior::FailToStart {
        stop_code: "EssentialContainerExited".to_string(),
        stop_reason: "Essential container in task exited".to_string(),
    });
    let h = Harness::with_parts(serverless_record(), MockJobQueue::new(), containers).await;

    let outcome = h.orchestrator.handle(&invocation("exec-8")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::TaskStopped(Some("EssentialContainerExited".to_string()))
        }
    );
    let failures = h.callback.failures().await;
    assert_eq!(failures[0].0, "EssentialContainerExited");
    assert_eq!(
        failures[0].1,
        "Runner task stopped: Essential container in task exited"
    );
}

#[tokio::test(start_paused = true)]
async fn test_task_crash_during_readiness_wait_fails() {
    let h = Harness::new(serverless_record()).await;
    h.spawn_crash("task-1", "EssentialContainerExited");

    let outcome = h.orchestrator.handle(&invocation("exec-9")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::TaskStopped(Some("EssentialContainerExited".to_string()))
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_task_stuck_provisioning_fails_to_start() {
    let containers = MockContainerApi::with_behavior(StartBehavior::StartAfter(1_000));
    let h = Harness::with_parts(serverless_record(), MockJobQueue::new(), containers).await;

    let outcome = h.orchestrator.handle(&invocation("exec-10")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::TaskStartFailed
        }
    );
    assert_eq!(h.callback.failures().await[0].0, "TaskFailedToStart");
    assert_eq!(h.containers.stopped_task_ids().await, vec!["task-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_launch_reports_task_failed_to_start() {
    let containers = MockContainerApi::with_behavior(StartBehavior::Reject(ProviderError::new(
        "AccessDeniedException",
        "not allowed to run tasks",
    )));
    let h = Harness::with_parts(serverless_record(), MockJobQueue::new(), containers).await;

    let outcome = h.orchestrator.handle(&invocation("exec-11")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::TaskStartFailed
        }
    );
    assert!(h.callback.failures().await[0].1.contains("AccessDeniedException"));
    assert_eq!(h.record().await.task_id, None);
}

#[tokio::test(start_paused = true)]
async fn test_vm_that_never_registers_is_terminated() {
    let h = Harness::new(vm_record()).await;
    h.containers.set_registered_after(None).await;

    let outcome = h.orchestrator.handle(&invocation("exec-12")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::VmStartFailed
        }
    );
    assert!(h.vms.terminated().await.contains(&"i-00000001".to_string()));
    assert!(h.containers.launches().await.is_empty());
    let failures = h.callback.failures().await;
    assert_eq!(failures[0].0, "VmFailedToStart");
    assert!(failures[0].1.contains("/dockhand/demo-web"));
}

#[tokio::test(start_paused = true)]
async fn test_ambiguous_container_is_configuration_error() {
    let h = Harness::new(serverless_record()).await;
    h.containers
        .set_containers(vec!["runner".to_string(), "sidecar".to_string()])
        .await;

    let outcome = h.orchestrator.handle(&invocation("exec-13")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::Configuration
        }
    );
    assert_eq!(h.callback.failures().await[0].0, "RunnerConfigError");
    assert!(h.containers.launches().await.is_empty());
    // The job was already enqueued.
    assert_eq!(h.queue.messages().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_image_alias_is_configuration_error() {
    let mut record = vm_record();
    record.vm = Some(VmState::new(
        VmConfig::from_json(
            &json!({
                "instanceType": "m5.large",
                "image": "Windows95",
                "instanceProfile": "runner-profile",
                "logGroup": "/dockhand/demo-web"
            }),
            RUNNER,
        )
        .unwrap(),
    ));
    let h = Harness::new(record).await;

    let outcome = h.orchestrator.handle(&invocation("exec-14")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::Configuration
        }
    );
    let failures = h.callback.failures().await;
    assert!(failures[0].1.starts_with("Unknown image alias Windows95"));
    assert!(h.vms.launches().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_record_is_reported() {
    let h = Harness::new(serverless_record()).await;
    let mut other = invocation("exec-15");
    other.runner = "api".to_string();

    let outcome = h.orchestrator.handle(&other).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::Configuration
        }
    );
    assert_eq!(
        h.callback.failures().await[0].1,
        "No runner found with name demo-api"
    );
    assert!(h.queue.messages().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_queue_outage_is_reported_before_provisioning() {
    let h = Harness::with_parts(
        serverless_record(),
        MockJobQueue::failing(),
        MockContainerApi::new(),
    )
    .await;

    let outcome = h.orchestrator.handle(&invocation("exec-16")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::Internal
        }
    );
    assert_eq!(h.callback.failures().await[0].0, "RunnerError");
    assert!(h.containers.calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_describe_outage_is_not_treated_as_dead() {
    let h = Harness::new(applied(serverless_record(), "task-9", "")).await;
    h.containers.insert_running_task("task-9").await;
    h.containers
        .set_describe_error(Some(ProviderError::new("ThrottlingException", "Rate exceeded")))
        .await;

    let outcome = h.orchestrator.handle(&invocation("exec-17")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::Internal
        }
    );
    assert!(h.containers.launches().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_held_task_lock_defers_to_other_execution() {
    let h = Harness::new(serverless_record()).await;
    assert!(
        h.store
            .try_acquire_lock(&key(), LockField::TaskStart, "exec-other", Duration::from_secs(3600))
            .await
            .unwrap()
    );

    let outcome = h.orchestrator.handle(&invocation("exec-18")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::LockHeld {
            lock: LockField::TaskStart
        }
    );
    assert!(h.containers.calls().await.is_empty());
    assert!(h.callback.events().await.is_empty());
    assert_eq!(h.queue.messages().await.len(), 1);
    assert_eq!(
        h.store.lock_holder(&key(), LockField::TaskStart).await.as_deref(),
        Some("exec-other")
    );
    assert_eq!(
        h.record().await.started_by_execution.as_deref(),
        Some("exec-18")
    );
}

#[tokio::test(start_paused = true)]
async fn test_held_vm_lock_skips_all_provisioning() {
    let h = Harness::new(vm_record()).await;
    h.store
        .try_acquire_lock(&key(), LockField::VmStart, "exec-other", Duration::from_secs(3600))
        .await
        .unwrap();

    let outcome = h.orchestrator.handle(&invocation("exec-19")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::LockHeld {
            lock: LockField::VmStart
        }
    );
    assert!(h.vms.calls().await.is_empty());
    assert!(h.containers.calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stale_lock_is_taken_over() {
    let h = Harness::new(serverless_record()).await;
    h.store
        .try_acquire_lock(&key(), LockField::TaskStart, "exec-crashed", Duration::from_secs(3600))
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(3601)).await;
    h.spawn_worker(None);

    let outcome = h.orchestrator.handle(&invocation("exec-20")).await.unwrap();

    assert!(matches!(outcome, Outcome::Ready { .. }));
    assert_eq!(h.store.lock_holder(&key(), LockField::TaskStart).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_retry_by_same_execution_reacquires_its_lock() {
    let h = Harness::new(serverless_record()).await;
    h.store
        .try_acquire_lock(&key(), LockField::TaskStart, "exec-21", Duration::from_secs(3600))
        .await
        .unwrap();
    h.spawn_worker(None);

    let outcome = h.orchestrator.handle(&invocation("exec-21")).await.unwrap();

    assert!(matches!(outcome, Outcome::Ready { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_drift_is_measured_before_fingerprint_is_saved() {
    // Applied fingerprint is stale but the task is running: the record is
    // saved with the new fingerprint first, yet the task is still replaced.
    let mut record = applied(serverless_record(), "task-9", "");
    record.task_fingerprint = Some(Fingerprint::from_i64(42));
    let h = Harness::new(record).await;
    h.containers.insert_running_task("task-9").await;
    h.spawn_worker(Some("task-9"));

    let outcome = h.orchestrator.handle(&invocation("exec-22")).await.unwrap();

    assert!(matches!(outcome, Outcome::Ready { .. }));
    assert_eq!(h.containers.stopped_task_ids().await, vec!["task-9"]);
}

#[tokio::test(start_paused = true)]
async fn test_describe_throttling_during_readiness_keeps_waiting() {
    let h = Harness::new(serverless_record()).await;
    let outage = h.spawn_describe_outage("task-1", "ThrottlingException", Duration::from_secs(5));

    let outcome = h.orchestrator.handle(&invocation("exec-23")).await.unwrap();

    assert!(outage.await.unwrap());
    assert_eq!(
        outcome,
        Outcome::Ready {
            task_id: "task-1".to_string()
        }
    );
    // Launch check plus polls that hit the throttled API.
    assert!(describes_of(&h.containers.calls().await, "task-1") >= 2);
    assert!(h.containers.stopped_task_ids().await.is_empty());
    assert!(h.callback.events().await.is_empty());
}

/// VM API that notes who holds the `vm_start` lock whenever a VM is terminated.
struct LockCheckingVmApi {
    inner: Arc<MockVmApi>,
    store: Arc<MemoryStore>,
    holders_at_terminate: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl VmApi for LockCheckingVmApi {
    async fn run_instance(&self, request: &VmLaunchRequest) -> Result<String, ProviderError> {
        self.inner.run_instance(request).await
    }

    async fn instance_state(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceState>, ProviderError> {
        self.inner.instance_state(instance_id).await
    }

    async fn wait_until_running(&self, instance_id: &str) -> Result<(), ProviderError> {
        self.inner.wait_until_running(instance_id).await
    }

    async fn wait_until_terminated(&self, instance_id: &str) -> Result<(), ProviderError> {
        self.inner.wait_until_terminated(instance_id).await
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        let holder = self.store.lock_holder(&key(), LockField::VmStart).await;
        self.holders_at_terminate.lock().await.push(holder);
        self.inner.terminate_instance(instance_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_invocation_terminates_vm_before_releasing_locks() {
    let h = Harness::new(vm_record()).await;
    let vms = Arc::new(LockCheckingVmApi {
        inner: h.vms.clone(),
        store: h.store.clone(),
        holders_at_terminate: Mutex::new(Vec::new()),
    });
    let orchestrator = RunnerOrchestrator::builder()
        .config(test_config())
        .store(h.store.clone())
        .queue(h.queue.clone())
        .containers(h.containers.clone())
        .vm_provisioning(vms.clone(), h.parameters.clone())
        .callback(h.callback.clone())
        .build()
        .unwrap();

    let outcome = orchestrator.handle(&invocation("exec-24")).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::ReadinessTimeout
        }
    );
    assert_eq!(h.vms.terminated().await, vec!["i-00000001"]);
    assert_eq!(
        *vms.holders_at_terminate.lock().await,
        vec![Some("exec-24".to_string())]
    );
    assert_eq!(h.store.lock_holder(&key(), LockField::VmStart).await, None);
    assert_eq!(h.store.lock_holder(&key(), LockField::TaskStart).await, None);
}
