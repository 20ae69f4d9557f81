// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operation work queue.
//!
//! Holds operation ids waiting to be processed. An id that is already
//! waiting is not queued twice. Worker tasks pull ids and hand them to an
//! [`Executor`]; a nonzero backoff puts the id back after the delay.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::ProcessError;

/// Something that advances an operation by id.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Process the operation. A nonzero duration asks to be called again
    /// after that delay.
    async fn execute(&self, operation_id: &str) -> Result<Duration, ProcessError>;
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    queued: HashSet<String>,
}

/// De-duplicating FIFO of operation ids.
pub struct OperationQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("shutdown", &*self.shutdown_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl OperationQueue {
    pub fn new() -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            shutdown_tx,
        })
    }

    /// Queue `operation_id` unless it is already waiting.
    pub async fn add(&self, operation_id: impl Into<String>) {
        if self.is_shut_down() {
            return;
        }
        let id = operation_id.into();
        let mut state = self.state.lock().await;
        if state.queued.insert(id.clone()) {
            state.pending.push_back(id);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Queue `operation_id` once `delay` has passed. Dropped on shutdown.
    pub fn add_after(self: &Arc<Self>, operation_id: impl Into<String>, delay: Duration) {
        let id = operation_id.into();
        if delay.is_zero() {
            let queue = self.clone();
            tokio::spawn(async move { queue.add(id).await });
            return;
        }

        let queue = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = async { let _ = shutdown_rx.wait_for(|stopped| *stopped).await; } => {}

                _ = tokio::time::sleep(delay) => queue.add(id).await,
            }
        });
    }

    /// Number of ids waiting.
    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Wait for the next id. `None` once the queue is shut down.
    pub async fn next(&self) -> Option<String> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            if *shutdown_rx.borrow_and_update() {
                return None;
            }
            {
                let mut state = self.state.lock().await;
                if let Some(id) = state.pending.pop_front() {
                    state.queued.remove(&id);
                    return Some(id);
                }
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = shutdown_rx.changed() => {}
            }
        }
    }

    /// Stop handing out ids and wake every waiting worker.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        self.notify.notify_waiters();
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Spawn `workers` tasks feeding ids to `executor`.
    pub fn spawn_workers(
        self: &Arc<Self>,
        executor: Arc<dyn Executor>,
        workers: usize,
    ) -> Vec<JoinHandle<()>> {
        (0..workers.max(1))
            .map(|worker| {
                let queue = self.clone();
                let executor = executor.clone();
                tokio::spawn(async move { queue.work(worker, executor).await })
            })
            .collect()
    }

    async fn work(self: Arc<Self>, worker: usize, executor: Arc<dyn Executor>) {
        debug!(worker, "Operation worker started");
        while let Some(operation_id) = self.next().await {
            match executor.execute(&operation_id).await {
                Ok(backoff) if backoff.is_zero() => {
                    debug!(worker, operation_id = %operation_id, "Operation processing finished");
                }
                Ok(backoff) => {
                    debug!(
                        worker,
                        operation_id = %operation_id,
                        backoff_ms = backoff.as_millis() as u64,
                        "Operation rescheduled"
                    );
                    self.add_after(operation_id, backoff);
                }
                Err(e) => {
                    error!(worker, operation_id = %operation_id, error = %e, "Failed to process operation");
                }
            }
        }
        info!(worker, "Operation worker stopped");
    }
}
