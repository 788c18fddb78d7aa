// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner orchestrator.
//!
//! Drives one invocation through the runner lifecycle:
//!
//! ```text
//!  load record ──► enqueue job ──► save record (desired fingerprint)
//!                                        │
//!                      ┌─────────────────┴──────────────┐
//!                      │ VM configured?                 │
//!                      ▼ yes                            │ no
//!              [vm_start lock] ──► reconcile VM         │
//!                      │          (launch/replace/reuse)│
//!                      └─────────────────┬──────────────┘
//!                                        ▼
//!                              [task_start lock] ──► reconcile task
//!                                        │        (start/replace/keep)
//!                                        ▼
//!                                 fresh start? ──► readiness wait
//! ```
//!
//! A lock held by another execution ends the invocation quietly. Any failure
//! after the job was enqueued terminates a VM this invocation launched and is
//! reported to the parked workflow step with the most specific error kind.

mod builder;
mod readiness;

pub use builder::RunnerOrchestratorBuilder;

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::callback::{FailureKind, WorkflowCallback};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::invocation::RunnerInvocation;
use crate::model::{ConfigurationDrift, Fingerprinted, RunnerKey, RunnerRecord};
use crate::queue::JobQueue;
use crate::store::{LockField, RunnerStore};
use crate::task::TaskManager;
use crate::vm::VmManager;

/// Stop reason for a task replaced after a configuration change.
pub const CONFIGURATION_CHANGED_REASON: &str = "Runner configuration changed";

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A new task was started and its worker reported ready.
    Ready {
        /// The new task.
        task_id: String,
    },
    /// The existing task already matched the desired configuration.
    Reused {
        /// The existing task.
        task_id: String,
    },
    /// Another execution holds a lock; nothing was provisioned.
    LockHeld {
        /// The contended lock.
        lock: LockField,
    },
    /// Another execution replaced the task after this one loaded the record.
    AlreadyReplaced {
        /// The task now recorded.
        task_id: Option<String>,
    },
    /// While waiting, a newer task took over; the one started here was stopped.
    Superseded {
        /// Task started and stopped by this invocation.
        stopped_task_id: String,
        /// Task now recorded.
        current_task_id: Option<String>,
    },
    /// The failure was reported to the workflow step.
    Failed {
        /// Reported error kind.
        kind: FailureKind,
    },
}

/// Per-invocation bookkeeping for compensation and lock release.
#[derive(Debug, Default)]
struct Attempt {
    started_vm: Option<String>,
    held_locks: Vec<LockField>,
}

/// Runner lifecycle orchestrator.
pub struct RunnerOrchestrator {
    config: Arc<Config>,
    store: Arc<dyn RunnerStore>,
    queue: Arc<dyn JobQueue>,
    tasks: TaskManager,
    vms: Option<VmManager>,
    callback: Arc<dyn WorkflowCallback>,
}

impl RunnerOrchestrator {
    /// Create a builder.
    pub fn builder() -> RunnerOrchestratorBuilder {
        RunnerOrchestratorBuilder::new()
    }

    /// Shared configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Handle one invocation.
    ///
    /// Failures are reported through the workflow callback and returned as
    /// [`Outcome::Failed`]. `Err` means the failure could not be reported.
    pub async fn handle(&self, invocation: &RunnerInvocation) -> Result<Outcome> {
        let key = invocation.key();
        info!(
            runner = %key,
            execution_id = %invocation.execution_id,
            step = %invocation.step_name,
            "Runner invocation received"
        );

        let mut attempt = Attempt::default();
        let result = self.reconcile(invocation, &key, &mut attempt).await;

        // Locks stay held until the failed attempt's VM is terminated.
        let outcome = match result {
            Ok(outcome) => {
                info!(runner = %key, outcome = ?outcome, "Runner invocation finished");
                Ok(outcome)
            }
            Err(err) => self.fail(invocation, &key, &attempt, err).await,
        };
        self.release_locks(&key, &invocation.execution_id, &attempt.held_locks)
            .await;
        outcome
    }

    async fn reconcile(
        &self,
        invocation: &RunnerInvocation,
        key: &RunnerKey,
        attempt: &mut Attempt,
    ) -> Result<Outcome> {
        let mut record = self.store.load(key).await?;
        let drift = record.drift();
        record.started_by_execution = Some(invocation.execution_id.clone());

        let message = invocation.job_message(&record.task_configuration.queue_url, drift.desired);
        self.queue.send(&message).await?;
        debug!(runner = %key, dedup_id = %message.dedup_id, "Job enqueued");

        record.task_fingerprint = Some(record.task_configuration.fingerprint());
        self.store.save(&record).await?;

        if record.has_vm() {
            if !self.acquire(key, LockField::VmStart, invocation, attempt).await? {
                return Ok(Outcome::LockHeld {
                    lock: LockField::VmStart,
                });
            }
            self.reconcile_vm(&mut record, attempt).await?;
        }

        if !self
            .acquire(key, LockField::TaskStart, invocation, attempt)
            .await?
        {
            return Ok(Outcome::LockHeld {
                lock: LockField::TaskStart,
            });
        }
        self.reconcile_task(invocation, &mut record, drift).await
    }

    async fn reconcile_vm(&self, record: &mut RunnerRecord, attempt: &mut Attempt) -> Result<()> {
        let Some(vm) = record.vm.clone() else {
            return Ok(());
        };
        let vms = self.vms.as_ref().ok_or_else(|| {
            Error::Configuration(format!(
                "Runner {} needs a VM but VM provisioning is not configured",
                record.key
            ))
        })?;
        let cluster = self
            .config
            .cluster_or_default(record.task_configuration.cluster.as_deref())
            .to_string();

        let instance_id = match vm.instance_id.as_deref() {
            None => {
                info!(runner = %record.key, "No runner VM recorded, launching one");
                self.launch_vm(vms, record, attempt).await?
            }
            Some(previous) if !vms.is_running(previous).await => {
                info!(runner = %record.key, instance_id = %previous, "Runner VM not running, launching a new one");
                self.launch_vm(vms, record, attempt).await?
            }
            Some(previous) if !vm.launched_from_current_config() => {
                info!(runner = %record.key, instance_id = %previous, "Runner VM configuration changed, replacing it");
                vms.terminate(previous).await?;
                vms.wait_until_terminated(previous).await?;
                self.launch_vm(vms, record, attempt).await?
            }
            Some(previous) => {
                debug!(runner = %record.key, instance_id = %previous, "Reusing runner VM");
                previous.to_string()
            }
        };

        if let Some(state) = record.vm.as_mut() {
            state.instance_id = Some(instance_id.clone());
            state.launched_fingerprint = Some(state.config.fingerprint());
        }
        self.store.save(record).await?;

        vms.wait_until_running(&instance_id, &cluster, &vm.config.log_group)
            .await
    }

    async fn launch_vm(
        &self,
        vms: &VmManager,
        record: &RunnerRecord,
        attempt: &mut Attempt,
    ) -> Result<String> {
        let instance_id = vms.start(record).await?;
        attempt.started_vm = Some(instance_id.clone());
        Ok(instance_id)
    }

    async fn reconcile_task(
        &self,
        invocation: &RunnerInvocation,
        record: &mut RunnerRecord,
        drift: ConfigurationDrift,
    ) -> Result<Outcome> {
        let current = self.store.load(&record.key).await?;
        if current.task_id != record.task_id {
            info!(
                runner = %record.key,
                task_id = ?current.task_id,
                "Runner task was replaced by another execution"
            );
            return Ok(Outcome::AlreadyReplaced {
                task_id: current.task_id,
            });
        }

        let previous_cluster = self
            .config
            .cluster_or_default(record.cluster.as_deref())
            .to_string();
        let status = self
            .tasks
            .describe_status(record.task_id.as_deref(), &previous_cluster)
            .await?;

        match record.task_id.clone() {
            None => {
                info!(runner = %record.key, "No runner task recorded, starting one");
            }
            Some(task_id) if status.is_running_or_starting() && drift.changed() => {
                info!(
                    runner = %record.key,
                    task_id = %task_id,
                    on_vm = record.has_vm(),
                    "Runner configuration changed, replacing task"
                );
                if record.has_vm() {
                    // The old task must release the VM's resources before the
                    // new one can be placed there.
                    record.shutdown_hook_disabled = true;
                    self.store.save(record).await?;
                    self.tasks
                        .stop(&task_id, &previous_cluster, CONFIGURATION_CHANGED_REASON)
                        .await?;
                    self.tasks
                        .wait_until_stopped(&task_id, &previous_cluster)
                        .await?;
                } else {
                    self.tasks
                        .stop(&task_id, &previous_cluster, CONFIGURATION_CHANGED_REASON)
                        .await?;
                }
            }
            Some(task_id) if status.needs_replacement() => {
                info!(
                    runner = %record.key,
                    task_id = %task_id,
                    lifecycle = ?status.lifecycle,
                    "Runner task is gone, starting a new one"
                );
            }
            Some(task_id) => {
                debug!(runner = %record.key, task_id = %task_id, "Runner task is up to date");
                return Ok(Outcome::Reused { task_id });
            }
        }

        let cluster = self
            .config
            .cluster_or_default(record.task_configuration.cluster.as_deref())
            .to_string();
        let task_id = self
            .tasks
            .start(record, drift.desired, &invocation.callback_token)
            .await?;

        record.task_id = Some(task_id.clone());
        record.task_definition = Some(record.task_configuration.task_definition.clone());
        record.cluster = Some(cluster.clone());
        record.ready = false;
        record.shutdown_hook_disabled = false;
        self.store.save(record).await?;

        if let Err(err) = self.tasks.wait_until_running(&task_id, &cluster).await {
            if let Err(stop_err) = self
                .tasks
                .stop(&task_id, &cluster, readiness::START_FAILED_REASON)
                .await
            {
                warn!(task_id = %task_id, error = %stop_err, "Failed to stop task that did not start");
            }
            return Err(err);
        }

        self.await_readiness(&record.key, &task_id, &cluster).await
    }

    async fn acquire(
        &self,
        key: &RunnerKey,
        field: LockField,
        invocation: &RunnerInvocation,
        attempt: &mut Attempt,
    ) -> Result<bool> {
        let acquired = self
            .store
            .try_acquire_lock(
                key,
                field,
                &invocation.execution_id,
                self.config.lock_stale_after,
            )
            .await?;
        if acquired {
            attempt.held_locks.push(field);
        } else {
            info!(
                runner = %key,
                lock = %field,
                execution_id = %invocation.execution_id,
                "Lock held by another execution, leaving provisioning to it"
            );
        }
        Ok(acquired)
    }

    async fn release_locks(&self, key: &RunnerKey, execution_id: &str, locks: &[LockField]) {
        for field in locks {
            if let Err(err) = self.store.release_lock(key, *field, execution_id).await {
                warn!(runner = %key, lock = %field, error = %err, "Failed to release lock");
            }
        }
    }

    async fn fail(
        &self,
        invocation: &RunnerInvocation,
        key: &RunnerKey,
        attempt: &Attempt,
        err: Error,
    ) -> Result<Outcome> {
        let kind = err.failure_kind();
        error!(runner = %key, kind = %kind, error = %err, "Runner invocation failed");

        if let (Some(instance_id), Some(vms)) = (&attempt.started_vm, &self.vms) {
            warn!(runner = %key, instance_id = %instance_id, "Terminating VM launched by failed invocation");
            if let Err(term_err) = vms.terminate(instance_id).await {
                warn!(instance_id = %instance_id, error = %term_err, "Failed to terminate VM");
            }
        }

        self.callback
            .send_failure(&invocation.callback_token, kind.as_str(), &err.to_string())
            .await?;
        Ok(Outcome::Failed { kind })
    }
}
