// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed job queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::debug;
use uuid::Uuid;

use super::{JobMessage, JobQueue};
use crate::error::{ProviderError, Result};

/// A message waiting in the queue.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueuedJob {
    /// Message id.
    pub message_id: Uuid,
    /// Ordering group.
    pub group_id: String,
    /// Deduplication id.
    pub dedup_id: String,
    /// Message body.
    pub body: Json<Value>,
    /// When the message was accepted.
    pub enqueued_at: DateTime<Utc>,
}

/// Job queue stored in the `job_messages` table.
///
/// Deduplication is enforced by the `(queue_url, dedup_id)` unique key.
#[derive(Clone)]
pub struct PostgresJobQueue {
    pool: PgPool,
}

impl PostgresJobQueue {
    /// Create a queue over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Messages in `queue_url`, oldest first within each group.
    pub async fn pending(&self, queue_url: &str) -> Result<Vec<QueuedJob>> {
        let jobs = sqlx::query_as::<_, QueuedJob>(
            r#"
            SELECT message_id, group_id, dedup_id, body, enqueued_at
            FROM job_messages
            WHERE queue_url = $1
            ORDER BY group_id, enqueued_at
            "#,
        )
        .bind(queue_url)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn send(&self, message: &JobMessage) -> std::result::Result<(), ProviderError> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_messages (message_id, queue_url, group_id, dedup_id, body)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (queue_url, dedup_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&message.queue_url)
        .bind(&message.group_id)
        .bind(&message.dedup_id)
        .bind(Json(&message.body))
        .execute(&self.pool)
        .await
        .map_err(|e| ProviderError::new("QueueWriteFailed", e.to_string()))?;

        if result.rows_affected() == 0 {
            debug!(dedup_id = %message.dedup_id, "Duplicate job message ignored");
        }
        Ok(())
    }
}
