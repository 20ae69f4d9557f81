// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for the broker workers.
//!
//! [`WorkerRuntime`] runs the operation work queue with its worker pool and,
//! when a resource client is configured, the label updater.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use broker_core::model::{DeprovisioningData, OperationType};
//! use broker_worker::process::{OperationManager, StepRunner};
//! use broker_worker::runtime::WorkerRuntime;
//! use broker_worker::steps::RemoveInstanceStep;
//!
//! let runner = StepRunner::<DeprovisioningData>::new(OperationManager::new(
//!     storage.operations().clone(),
//! ))
//! .with_step(Arc::new(RemoveInstanceStep::new(&storage)));
//!
//! let runtime = WorkerRuntime::builder()
//!     .storage(storage)
//!     .executor(Arc::new(runner))
//!     .recover_type(OperationType::Deprovision)
//!     .workers(5)
//!     .build()?
//!     .start()
//!     .await?;
//!
//! runtime.queue().add("operation-id").await;
//!
//! runtime.shutdown().await?;
//! ```

use std::sync::Arc;

use anyhow::Result;
use broker_core::BrokerStorage;
use broker_core::model::OperationType;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::labels::{
    LabelUpdater, LabelUpdaterConfig, PriorityQueue, QueueElement, QueueItem, ResourceClient,
};
use crate::process::{Executor, OperationQueue};

const DEFAULT_WORKERS: usize = 5;

/// Builder for creating a [`WorkerRuntime`].
pub struct WorkerRuntimeBuilder {
    storage: Option<BrokerStorage>,
    executor: Option<Arc<dyn Executor>>,
    recover_type: Option<OperationType>,
    workers: usize,
    resource_client: Option<Arc<dyn ResourceClient>>,
    label_queue: Option<Arc<PriorityQueue>>,
    label_config: LabelUpdaterConfig,
}

impl Default for WorkerRuntimeBuilder {
    fn default() -> Self {
        Self {
            storage: None,
            executor: None,
            recover_type: None,
            workers: DEFAULT_WORKERS,
            resource_client: None,
            label_queue: None,
            label_config: LabelUpdaterConfig::default(),
        }
    }
}

impl WorkerRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the storage (required).
    pub fn storage(mut self, storage: BrokerStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the executor the workers feed operation ids to (required).
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Re-enqueue in-progress operations of this type on start.
    pub fn recover_type(mut self, operation_type: OperationType) -> Self {
        self.recover_type = Some(operation_type);
        self
    }

    /// Number of operation workers.
    ///
    /// Default: 5
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Enable the label updater against this client.
    pub fn resource_client(mut self, client: Arc<dyn ResourceClient>) -> Self {
        self.resource_client = Some(client);
        self
    }

    /// Share an existing label queue. A fresh one is created otherwise.
    pub fn label_queue(mut self, queue: Arc<PriorityQueue>) -> Self {
        self.label_queue = Some(queue);
        self
    }

    pub fn label_config(mut self, config: LabelUpdaterConfig) -> Self {
        self.label_config = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<WorkerRuntimeConfig> {
        let storage = self
            .storage
            .ok_or_else(|| anyhow::anyhow!("storage is required"))?;
        let executor = self
            .executor
            .ok_or_else(|| anyhow::anyhow!("executor is required"))?;
        if self.workers == 0 {
            anyhow::bail!("workers must be greater than zero");
        }

        Ok(WorkerRuntimeConfig {
            storage,
            executor,
            recover_type: self.recover_type,
            workers: self.workers,
            resource_client: self.resource_client,
            label_queue: self
                .label_queue
                .unwrap_or_else(|| Arc::new(PriorityQueue::new())),
            label_config: self.label_config,
        })
    }
}

/// Configuration for a [`WorkerRuntime`].
pub struct WorkerRuntimeConfig {
    storage: BrokerStorage,
    executor: Arc<dyn Executor>,
    recover_type: Option<OperationType>,
    workers: usize,
    resource_client: Option<Arc<dyn ResourceClient>>,
    label_queue: Arc<PriorityQueue>,
    label_config: LabelUpdaterConfig,
}

impl WorkerRuntimeConfig {
    /// Start the operation workers and, if configured, the label updater.
    pub async fn start(self) -> Result<WorkerRuntime> {
        let queue = OperationQueue::new();
        let worker_handles = queue.spawn_workers(self.executor, self.workers);

        if let Some(operation_type) = self.recover_type {
            let unfinished = self
                .storage
                .operations()
                .get_not_finished_operations_by_type(operation_type)
                .await?;
            info!(
                operation_type = %operation_type,
                count = unfinished.len(),
                "Re-enqueuing unfinished operations"
            );
            for operation in unfinished {
                queue.add(operation.id).await;
            }
        }

        let label_updater = self.resource_client.map(|client| {
            let updater =
                LabelUpdater::new(client, self.label_queue.clone(), self.label_config.clone());
            let shutdown = updater.shutdown_handle();
            let handle = tokio::spawn(async move {
                updater.run().await;
            });
            (handle, shutdown)
        });

        info!(
            workers = self.workers,
            label_updater = label_updater.is_some(),
            "WorkerRuntime started"
        );

        Ok(WorkerRuntime {
            queue,
            label_queue: self.label_queue,
            worker_handles,
            label_updater,
        })
    }
}

/// Running broker workers.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct WorkerRuntime {
    queue: Arc<OperationQueue>,
    label_queue: Arc<PriorityQueue>,
    worker_handles: Vec<JoinHandle<()>>,
    label_updater: Option<(JoinHandle<()>, Arc<Notify>)>,
}

impl WorkerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> WorkerRuntimeBuilder {
        WorkerRuntimeBuilder::new()
    }

    /// Queue feeding the operation workers.
    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    /// Queue drained by the label updater.
    pub fn label_queue(&self) -> &Arc<PriorityQueue> {
        &self.label_queue
    }

    /// Request that the resources of a subaccount get the labels in `item`.
    ///
    /// `modified_at` is the Unix-millisecond change time of the source
    /// record; a queued request for the same subaccount is replaced only by
    /// a newer one. Returns `false` without queuing when the runtime has no
    /// label updater to drain the queue.
    pub async fn enqueue_label_sync(&self, item: QueueItem, modified_at: i64) -> bool {
        if self.label_updater.is_none() {
            warn!(
                subaccount_id = %item.subaccount_id,
                "Label sync requested but no resource client is configured"
            );
            return false;
        }
        debug!(subaccount_id = %item.subaccount_id, modified_at, "Label sync queued");
        self.label_queue
            .insert(QueueElement { item, modified_at })
            .await;
        true
    }

    pub fn is_running(&self) -> bool {
        let label_running = self
            .label_updater
            .as_ref()
            .is_none_or(|(handle, _)| !handle.is_finished());
        self.worker_handles.iter().all(|h| !h.is_finished()) && label_running
    }

    /// Stop the workers and the label updater, then wait for them.
    ///
    /// Operations being processed finish their current pass; delayed
    /// requeues still pending are dropped and picked up again on the next
    /// start through recovery.
    pub async fn shutdown(self) -> Result<()> {
        info!("WorkerRuntime shutting down...");

        self.queue.shutdown();
        if let Some((_, shutdown)) = &self.label_updater {
            shutdown.notify_one();
        }

        let mut panicked = 0;
        for handle in self.worker_handles {
            if let Err(e) = handle.await {
                error!("Operation worker task panicked: {}", e);
                panicked += 1;
            }
        }

        if let Some((handle, _)) = self.label_updater
            && let Err(e) = handle.await
        {
            error!("Label updater task panicked: {}", e);
            panicked += 1;
        }

        if panicked > 0 {
            warn!(panicked, "WorkerRuntime stopped with panicked tasks");
            return Err(anyhow::anyhow!("{panicked} worker task(s) panicked"));
        }
        info!("WorkerRuntime shutdown complete");
        Ok(())
    }
}
