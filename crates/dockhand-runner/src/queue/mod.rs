// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job queue.
//!
//! Every invocation enqueues its job before any provisioning happens. The
//! deduplication key and the message group key are both derived from the
//! execution id and step name, so a retried invocation never enqueues the
//! same job twice and jobs of one step stay ordered.

mod mock;
mod postgres;

pub use mock::MockJobQueue;
pub use postgres::{PostgresJobQueue, QueuedJob};

use async_trait::async_trait;
use md5::{Digest, Md5};
use serde_json::Value;

use crate::error::ProviderError;

/// A message bound for a runner's job queue.
#[derive(Debug, Clone, PartialEq)]
pub struct JobMessage {
    /// Destination queue.
    pub queue_url: String,
    /// Ordering group.
    pub group_id: String,
    /// Deduplication id.
    pub dedup_id: String,
    /// Message body.
    pub body: Value,
}

impl JobMessage {
    /// Message for the job of `step_name` in `execution_id`.
    pub fn for_step(
        queue_url: impl Into<String>,
        execution_id: &str,
        step_name: &str,
        body: Value,
    ) -> Self {
        let key = dedup_key(execution_id, step_name);
        Self {
            queue_url: queue_url.into(),
            group_id: key.clone(),
            dedup_id: key,
            body,
        }
    }
}

/// Lower-case hex MD5 of `execution_id` followed by `step_name`.
pub fn dedup_key(execution_id: &str, step_name: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(execution_id.as_bytes());
    hasher.update(step_name.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// FIFO queue with deduplication.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue `message`. Enqueueing a duplicate dedup id is a successful no-op.
    async fn send(&self, message: &JobMessage) -> Result<(), ProviderError>;
}
