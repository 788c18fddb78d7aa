// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource state store.
//!
//! One record per runner, keyed by `(resource_type, owner-runner)`. Reads are
//! strongly consistent and [`RunnerStore::save`] is an unconditional full
//! upsert: apart from the lock fields, record writes are last-writer-wins.
//!
//! # Locks
//!
//! Two independent lock fields ([`LockField::VmStart`], [`LockField::TaskStart`])
//! guard provisioning against overlapping workflow executions. Acquisition is a
//! compare-and-set that reports contention as `Ok(false)`:
//!
//! | Holder                              | `try_acquire_lock(exec)` |
//! |-------------------------------------|--------------------------|
//! | none                                | `true`, holder = exec    |
//! | `exec` (retried invocation)         | `true`                   |
//! | other execution, younger than stale | `false`                  |
//! | other execution, older than stale   | `true`, taken over       |
//!
//! Locks are released with a matching compare-and-set when the holding
//! invocation finishes.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{RunnerKey, RunnerRecord};

/// Lock fields on a runner record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockField {
    /// Held while the backing VM is reconciled.
    VmStart,
    /// Held while the container task is reconciled.
    TaskStart,
}

impl LockField {
    /// Name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            LockField::VmStart => "vm_start",
            LockField::TaskStart => "task_start",
        }
    }

    fn holder_column(self) -> &'static str {
        match self {
            LockField::VmStart => "vm_start_lock",
            LockField::TaskStart => "task_start_lock",
        }
    }

    fn acquired_column(self) -> &'static str {
        match self {
            LockField::VmStart => "vm_start_lock_acquired_at",
            LockField::TaskStart => "task_start_lock_acquired_at",
        }
    }
}

impl std::fmt::Display for LockField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runner record persistence.
#[async_trait]
pub trait RunnerStore: Send + Sync {
    /// Load a record. Fails with [`crate::Error::RunnerNotFound`] if absent and
    /// [`crate::Error::Configuration`] if its stored configuration is invalid.
    async fn load(&self, key: &RunnerKey) -> Result<RunnerRecord>;

    /// Insert or fully overwrite a record. Lock fields are not touched.
    async fn save(&self, record: &RunnerRecord) -> Result<()>;

    /// Try to take `field` for `execution_id`. See the module docs.
    ///
    /// Returns `Ok(false)` when another execution holds it or the record does
    /// not exist.
    async fn try_acquire_lock(
        &self,
        key: &RunnerKey,
        field: LockField,
        execution_id: &str,
        stale_after: Duration,
    ) -> Result<bool>;

    /// Clear `field` if `execution_id` still holds it.
    async fn release_lock(&self, key: &RunnerKey, field: LockField, execution_id: &str)
    -> Result<bool>;

    /// Mark the worker ready. Only succeeds while `task_id` is the recorded task.
    async fn mark_ready(&self, key: &RunnerKey, task_id: &str) -> Result<bool>;
}
