// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broker Worker - deprovisioning runner
//!
//! Connects to PostgreSQL, applies migrations and resumes unfinished
//! deprovisioning operations. Label sync needs a producer of label intents
//! and only runs when [`WorkerRuntime`] is embedded.

use std::sync::Arc;

use broker_core::model::{DeprovisioningData, OperationType};
use broker_core::{AesCipher, BrokerStorage, PostgresBackend, Retrier, SystemClock};
use tracing::{info, warn};

use broker_worker::config::Config;
use broker_worker::process::{OperationManager, StepRunner};
use broker_worker::runtime::WorkerRuntime;
use broker_worker::steps::RemoveInstanceStep;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "broker_worker=info,broker_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;
    info!(
        workers = config.workers,
        operation_timeout_secs = config.operation_timeout.as_secs(),
        label_sync = config.label_sync.enabled,
        "Starting Broker Worker"
    );

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.storage.max_connections)
        .connect(&config.storage.database_url)
        .await?;
    info!("Connected to database");

    broker_core::migrations::run_postgres(&pool).await?;
    info!("Database migrations applied");

    let cipher = Arc::new(AesCipher::new(&config.storage.encryption_secret)?);
    let retrier = Retrier::new(config.storage.retry_policy, Arc::new(SystemClock));
    let storage = BrokerStorage::new(Arc::new(PostgresBackend::new(pool)), cipher, retrier);

    let runner = StepRunner::<DeprovisioningData>::new(OperationManager::new(
        storage.operations().clone(),
    ))
    .with_step(Arc::new(RemoveInstanceStep::new(&storage)))
    .with_operation_timeout(config.operation_timeout);

    if config.label_sync.enabled {
        // Label intents come from the subaccount sync, which runs in the
        // embedding service; the standalone worker has nothing to feed them.
        warn!(
            "Label sync is enabled but the standalone worker has no label producer; \
             embed WorkerRuntime and call enqueue_label_sync to run it"
        );
    }

    let runtime = WorkerRuntime::builder()
        .storage(storage)
        .executor(Arc::new(runner))
        .recover_type(OperationType::Deprovision)
        .workers(config.workers)
        .build()?
        .start()
        .await?;
    info!("Broker Worker ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Broker Worker shut down");

    Ok(())
}
