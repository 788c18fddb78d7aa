// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory job queue for testing.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{JobMessage, JobQueue};
use crate::error::ProviderError;

#[derive(Default)]
struct QueueState {
    messages: Vec<JobMessage>,
    seen: HashSet<(String, String)>,
}

/// Queue keeping accepted messages in memory, deduplicated like the real one.
#[derive(Default)]
pub struct MockJobQueue {
    state: Mutex<QueueState>,
    /// If true, every send fails.
    pub fail_sends: bool,
}

impl MockJobQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue whose sends always fail.
    pub fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    /// Messages accepted so far.
    pub async fn messages(&self) -> Vec<JobMessage> {
        self.state.lock().await.messages.clone()
    }
}

#[async_trait]
impl JobQueue for MockJobQueue {
    async fn send(&self, message: &JobMessage) -> Result<(), ProviderError> {
        if self.fail_sends {
            return Err(ProviderError::new(
                "QueueDoesNotExist",
                format!("The specified queue does not exist: {}", message.queue_url),
            ));
        }
        let mut state = self.state.lock().await;
        let key = (message.queue_url.clone(), message.dedup_id.clone());
        if state.seen.insert(key) {
            state.messages.push(message.clone());
        }
        Ok(())
    }
}
