// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory runner store for tests and embedded use.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{LockField, RunnerStore};
use crate::error::{Error, Result};
use crate::model::{RunnerKey, RunnerRecord};

struct Entry {
    record: RunnerRecord,
    locks: HashMap<LockField, (String, Instant)>,
}

/// Runner store holding records in a map.
///
/// Lock ages use tokio's clock, so paused-time tests can age locks with
/// `tokio::time::advance`.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `records`.
    pub async fn with_records(records: impl IntoIterator<Item = RunnerRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record).await;
        }
        store
    }

    /// Insert a record without counting it as a save.
    pub async fn insert(&self, record: RunnerRecord) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            record.key.resource_name(),
            Entry {
                record,
                locks: HashMap::new(),
            },
        );
    }

    /// Current record, if any.
    pub async fn get(&self, key: &RunnerKey) -> Option<RunnerRecord> {
        let entries = self.entries.lock().await;
        entries.get(&key.resource_name()).map(|e| e.record.clone())
    }

    /// Execution currently holding `field`.
    pub async fn lock_holder(&self, key: &RunnerKey, field: LockField) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(&key.resource_name())
            .and_then(|e| e.locks.get(&field))
            .map(|(holder, _)| holder.clone())
    }

    /// Number of `save` calls so far.
    pub async fn save_count(&self) -> usize {
        *self.saves.lock().await
    }
}

#[async_trait]
impl RunnerStore for MemoryStore {
    async fn load(&self, key: &RunnerKey) -> Result<RunnerRecord> {
        self.get(key)
            .await
            .ok_or_else(|| Error::RunnerNotFound(key.to_string()))
    }

    async fn save(&self, record: &RunnerRecord) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries
            .entry(record.key.resource_name())
            .and_modify(|e| e.record = record.clone())
            .or_insert_with(|| Entry {
                record: record.clone(),
                locks: HashMap::new(),
            });
        *self.saves.lock().await += 1;
        Ok(())
    }

    async fn try_acquire_lock(
        &self,
        key: &RunnerKey,
        field: LockField,
        execution_id: &str,
        stale_after: Duration,
    ) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&key.resource_name()) else {
            return Ok(false);
        };

        let now = Instant::now();
        let free = match entry.locks.get(&field) {
            None => true,
            Some((holder, _)) if holder == execution_id => true,
            Some((_, acquired_at)) => now.duration_since(*acquired_at) > stale_after,
        };
        if free {
            entry.locks.insert(field, (execution_id.to_string(), now));
        }
        Ok(free)
    }

    async fn release_lock(
        &self,
        key: &RunnerKey,
        field: LockField,
        execution_id: &str,
    ) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&key.resource_name()) else {
            return Ok(false);
        };
        match entry.locks.get(&field) {
            Some((holder, _)) if holder == execution_id => {
                entry.locks.remove(&field);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_ready(&self, key: &RunnerKey, task_id: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(&key.resource_name()) {
            Some(entry) if entry.record.task_id.as_deref() == Some(task_id) => {
                entry.record.ready = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
