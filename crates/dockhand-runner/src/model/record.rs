// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The per-runner record: single source of truth for what is running.

use std::fmt;

use super::fingerprint::{Fingerprint, Fingerprinted};
use super::task_config::TaskConfiguration;
use super::vm::VmState;

/// Resource type of runner records in the state store.
pub const RESOURCE_TYPE: &str = "Runner";

/// Identity of a runner slot: the owning stack and the runner's logical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunnerKey {
    /// Owning stack.
    pub owner: String,
    /// Runner name within the stack.
    pub runner: String,
}

impl RunnerKey {
    /// Create a key.
    pub fn new(owner: impl Into<String>, runner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            runner: runner.into(),
        }
    }

    /// `owner-runner`: the record name and the worker's resource name.
    pub fn resource_name(&self) -> String {
        format!("{}-{}", self.owner, self.runner)
    }
}

impl fmt::Display for RunnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.owner, self.runner)
    }
}

/// Distribution the runner belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    /// Distribution id.
    pub id: String,
    /// Distribution name.
    pub name: String,
    /// Environment name.
    pub environment: String,
}

/// Application-level readiness, as reported by the worker itself.
///
/// Independent of the scheduler's view ([`crate::task::TaskLifecycle`]): a
/// task can be `running` long before the worker inside it is `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppReadiness {
    /// The worker has not reported in.
    Pending,
    /// The worker is consuming jobs.
    Ready,
}

/// Runner record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerRecord {
    /// Runner identity.
    pub key: RunnerKey,
    /// Owning distribution.
    pub distribution: Distribution,
    /// Version marker of the deployed artifact.
    pub artifact_version: String,
    /// Task currently serving this runner.
    pub task_id: Option<String>,
    /// Container name override; resolved from the task definition when absent.
    pub container: Option<String>,
    /// Task definition the current task was started from.
    pub task_definition: Option<String>,
    /// Task configuration fingerprint last recorded as applied.
    pub task_fingerprint: Option<Fingerprint>,
    /// Cluster the current task was started in.
    pub cluster: Option<String>,
    /// Desired task configuration.
    pub task_configuration: TaskConfiguration,
    /// Set by the worker once it is consuming jobs.
    pub ready: bool,
    /// Workflow execution that last drove this record.
    pub started_by_execution: Option<String>,
    /// Set before a deliberate stop so the worker skips its shutdown hook.
    pub shutdown_hook_disabled: bool,
    /// Backing VM, if the runner has one.
    pub vm: Option<VmState>,
}

impl RunnerRecord {
    /// Worker readiness.
    pub fn readiness(&self) -> AppReadiness {
        if self.ready {
            AppReadiness::Ready
        } else {
            AppReadiness::Pending
        }
    }

    /// Fingerprint of the desired configuration (task plus VM).
    pub fn desired_fingerprint(&self) -> Fingerprint {
        Fingerprint::combine(
            self.task_configuration.fingerprint(),
            self.vm.as_ref().map(|vm| vm.config.fingerprint()),
        )
    }

    /// Fingerprint of the configuration recorded as applied, if any was.
    pub fn applied_fingerprint(&self) -> Option<Fingerprint> {
        let task = self.task_fingerprint?;
        Some(Fingerprint::combine(
            task,
            self.vm.as_ref().and_then(|vm| vm.launched_fingerprint),
        ))
    }

    /// Compare desired against applied configuration.
    pub fn drift(&self) -> ConfigurationDrift {
        ConfigurationDrift {
            applied: self.applied_fingerprint(),
            desired: self.desired_fingerprint(),
        }
    }

    /// Whether the runner has a backing VM.
    pub fn has_vm(&self) -> bool {
        self.vm.is_some()
    }
}

/// Desired vs applied configuration, captured when a record is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationDrift {
    /// Applied fingerprint at load time.
    pub applied: Option<Fingerprint>,
    /// Desired fingerprint.
    pub desired: Fingerprint,
}

impl ConfigurationDrift {
    /// True if the running task does not reflect the desired configuration.
    pub fn changed(&self) -> bool {
        self.applied != Some(self.desired)
    }
}
