// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dockhand Migrate - prepares the runner database.
//!
//! Validates the orchestrator configuration and applies the schema for
//! runner records and job messages.

use tracing::{info, warn};

use dockhand_runner::config::Config;
use dockhand_runner::migrations;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dockhand_runner=info,dockhand_migrate=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;
    info!(
        region = %config.region,
        default_cluster = %config.default_cluster,
        runner_version = %config.runner_version,
        readiness_ceiling_secs = config.readiness.ceiling().as_secs(),
        "Configuration loaded"
    );

    let database_url = std::env::var("DOCKHAND_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DOCKHAND_DATABASE_URL must be set"))?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;
    info!("Connected to database");

    migrations::run(&pool).await?;
    info!(
        applied = migrations::MIGRATOR.iter().count(),
        "Database schema up to date"
    );

    pool.close().await;
    Ok(())
}
