// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL runner store.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::debug;

use super::{LockField, RunnerStore};
use crate::error::{Error, Result};
use crate::model::{
    Distribution, Fingerprint, RESOURCE_TYPE, RunnerKey, RunnerRecord, TaskConfiguration,
    VmConfig, VmState,
};

/// Runner store backed by the `runner_records` table.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store over an existing pool. Run [`crate::migrations::run`] first.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RunnerRow {
    owner: String,
    runner: String,
    distribution_id: String,
    distribution_name: String,
    environment: String,
    artifact_version: String,
    task_id: Option<String>,
    container: Option<String>,
    task_definition: Option<String>,
    task_fingerprint: Option<i64>,
    cluster: Option<String>,
    task_configuration: Json<Value>,
    ready: bool,
    started_by_execution: Option<String>,
    shutdown_hook_disabled: bool,
    vm_configuration: Option<Json<Value>>,
    vm_instance_id: Option<String>,
    vm_fingerprint: Option<i64>,
}

impl RunnerRow {
    fn into_record(self) -> Result<RunnerRecord> {
        let task_configuration = TaskConfiguration::from_json(&self.task_configuration.0, &self.runner)?;
        let vm = match self.vm_configuration {
            Some(Json(value)) => Some(VmState {
                config: VmConfig::from_json(&value, &self.runner)?,
                instance_id: self.vm_instance_id,
                launched_fingerprint: self.vm_fingerprint.map(Fingerprint::from_i64),
            }),
            None => None,
        };
        Ok(RunnerRecord {
            key: RunnerKey::new(self.owner, self.runner),
            distribution: Distribution {
                id: self.distribution_id,
                name: self.distribution_name,
                environment: self.environment,
            },
            artifact_version: self.artifact_version,
            task_id: self.task_id,
            container: self.container,
            task_definition: self.task_definition,
            task_fingerprint: self.task_fingerprint.map(Fingerprint::from_i64),
            cluster: self.cluster,
            task_configuration,
            ready: self.ready,
            started_by_execution: self.started_by_execution,
            shutdown_hook_disabled: self.shutdown_hook_disabled,
            vm,
        })
    }
}

#[async_trait]
impl RunnerStore for PostgresStore {
    async fn load(&self, key: &RunnerKey) -> Result<RunnerRecord> {
        let row = sqlx::query_as::<_, RunnerRow>(
            r#"
            SELECT owner, runner, distribution_id, distribution_name, environment,
                   artifact_version, task_id, container, task_definition, task_fingerprint,
                   cluster, task_configuration, ready, started_by_execution,
                   shutdown_hook_disabled, vm_configuration, vm_instance_id, vm_fingerprint
            FROM runner_records
            WHERE resource_type = $1 AND name = $2
            "#,
        )
        .bind(RESOURCE_TYPE)
        .bind(key.resource_name())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::RunnerNotFound(key.to_string()))?
            .into_record()
    }

    async fn save(&self, record: &RunnerRecord) -> Result<()> {
        let task_configuration = serde_json::to_value(&record.task_configuration)?;
        let vm_configuration = match &record.vm {
            Some(vm) => Some(Json(serde_json::to_value(&vm.config)?)),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO runner_records (
                resource_type, name, owner, runner, distribution_id, distribution_name,
                environment, artifact_version, task_id, container, task_definition,
                task_fingerprint, cluster, task_configuration, ready, started_by_execution,
                shutdown_hook_disabled, vm_configuration, vm_instance_id, vm_fingerprint,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, NOW())
            ON CONFLICT (resource_type, name) DO UPDATE SET
                distribution_id = EXCLUDED.distribution_id,
                distribution_name = EXCLUDED.distribution_name,
                environment = EXCLUDED.environment,
                artifact_version = EXCLUDED.artifact_version,
                task_id = EXCLUDED.task_id,
                container = EXCLUDED.container,
                task_definition = EXCLUDED.task_definition,
                task_fingerprint = EXCLUDED.task_fingerprint,
                cluster = EXCLUDED.cluster,
                task_configuration = EXCLUDED.task_configuration,
                ready = EXCLUDED.ready,
                started_by_execution = EXCLUDED.started_by_execution,
                shutdown_hook_disabled = EXCLUDED.shutdown_hook_disabled,
                vm_configuration = EXCLUDED.vm_configuration,
                vm_instance_id = EXCLUDED.vm_instance_id,
                vm_fingerprint = EXCLUDED.vm_fingerprint,
                updated_at = NOW()
            "#,
        )
        .bind(RESOURCE_TYPE)
        .bind(record.key.resource_name())
        .bind(&record.key.owner)
        .bind(&record.key.runner)
        .bind(&record.distribution.id)
        .bind(&record.distribution.name)
        .bind(&record.distribution.environment)
        .bind(&record.artifact_version)
        .bind(&record.task_id)
        .bind(&record.container)
        .bind(&record.task_definition)
        .bind(record.task_fingerprint.map(Fingerprint::as_i64))
        .bind(&record.cluster)
        .bind(Json(task_configuration))
        .bind(record.ready)
        .bind(&record.started_by_execution)
        .bind(record.shutdown_hook_disabled)
        .bind(vm_configuration)
        .bind(record.vm.as_ref().and_then(|vm| vm.instance_id.as_deref()))
        .bind(
            record
                .vm
                .as_ref()
                .and_then(|vm| vm.launched_fingerprint)
                .map(Fingerprint::as_i64),
        )
        .execute(&self.pool)
        .await?;

        debug!(runner = %record.key, task_id = ?record.task_id, "Runner record saved");
        Ok(())
    }

    async fn try_acquire_lock(
        &self,
        key: &RunnerKey,
        field: LockField,
        execution_id: &str,
        stale_after: Duration,
    ) -> Result<bool> {
        let holder = field.holder_column();
        let acquired = field.acquired_column();
        let sql = format!(
            r#"
            UPDATE runner_records
            SET {holder} = $3, {acquired} = NOW()
            WHERE resource_type = $1 AND name = $2
              AND ({holder} IS NULL
                   OR {holder} = $3
                   OR {acquired} < NOW() - make_interval(secs => $4))
            "#
        );

        let result = sqlx::query(&sql)
            .bind(RESOURCE_TYPE)
            .bind(key.resource_name())
            .bind(execution_id)
            .bind(stale_after.as_secs_f64())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lock(
        &self,
        key: &RunnerKey,
        field: LockField,
        execution_id: &str,
    ) -> Result<bool> {
        let holder = field.holder_column();
        let acquired = field.acquired_column();
        let sql = format!(
            r#"
            UPDATE runner_records
            SET {holder} = NULL, {acquired} = NULL
            WHERE resource_type = $1 AND name = $2 AND {holder} = $3
            "#
        );

        let result = sqlx::query(&sql)
            .bind(RESOURCE_TYPE)
            .bind(key.resource_name())
            .bind(execution_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_ready(&self, key: &RunnerKey, task_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE runner_records
            SET ready = TRUE, updated_at = NOW()
            WHERE resource_type = $1 AND name = $2 AND task_id = $3
            "#,
        )
        .bind(RESOURCE_TYPE)
        .bind(key.resource_name())
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
