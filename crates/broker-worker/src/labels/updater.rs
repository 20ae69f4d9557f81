// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Consumer applying queued label state to external resources.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::LabelSyncConfig;

use super::client::{Resource, ResourceClient, ResourceError};
use super::queue::{PriorityQueue, QueueItem};
use super::{BETA_ENABLED_LABEL, NAMESPACE, SUBACCOUNT_ID_LABEL, USED_FOR_PRODUCTION_LABEL};

#[derive(Debug, Clone)]
pub struct LabelUpdaterConfig {
    /// Sleep after finding the queue empty or requeuing an item.
    pub poll_interval: Duration,
    /// Bound on each resource API call.
    pub request_timeout: Duration,
    pub namespace: String,
}

impl Default for LabelUpdaterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            namespace: NAMESPACE.to_string(),
        }
    }
}

impl From<&LabelSyncConfig> for LabelUpdaterConfig {
    fn from(config: &LabelSyncConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            request_timeout: config.request_timeout,
            namespace: NAMESPACE.to_string(),
        }
    }
}

/// What a single [`LabelUpdater::process_next`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The queue was empty.
    Empty,
    /// No resource carries the subaccount label; the item was discarded.
    Dropped,
    /// Labels were applied to this many resources.
    Applied(usize),
    /// A call failed and the item went back into the queue.
    Requeued,
}

/// Drains the label queue into the resource API.
pub struct LabelUpdater {
    client: Arc<dyn ResourceClient>,
    queue: Arc<PriorityQueue>,
    config: LabelUpdaterConfig,
    shutdown: Arc<Notify>,
}

impl LabelUpdater {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        queue: Arc<PriorityQueue>,
        config: LabelUpdaterConfig,
    ) -> Self {
        Self {
            client,
            queue,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run until shutdown is signalled.
    ///
    /// Shutdown is only observed between items, so an item taken off the
    /// queue is always applied or requeued before the loop exits.
    pub async fn run(&self) {
        info!(
            namespace = %self.config.namespace,
            beta_label = BETA_ENABLED_LABEL,
            production_label = USED_FOR_PRODUCTION_LABEL,
            "Label updater started"
        );

        loop {
            let outcome = self.process_next().await;
            let pause = match outcome {
                ProcessOutcome::Empty | ProcessOutcome::Requeued => self.config.poll_interval,
                ProcessOutcome::Dropped | ProcessOutcome::Applied(_) => Duration::ZERO,
            };

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Label updater received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Label updater stopped");
    }

    /// Take one item off the queue and apply it.
    pub async fn process_next(&self) -> ProcessOutcome {
        let Some(element) = self.queue.extract().await else {
            return ProcessOutcome::Empty;
        };
        let item = &element.item;
        debug!(
            subaccount_id = %item.subaccount_id,
            beta_enabled = %item.beta_enabled,
            used_for_production = %item.used_for_production,
            "Item dequeued"
        );

        let resources = match self
            .bounded(self.client.list_by_label(
                &self.config.namespace,
                SUBACCOUNT_ID_LABEL,
                &item.subaccount_id,
            ))
            .await
        {
            Ok(resources) => resources,
            Err(e) => {
                warn!(
                    subaccount_id = %item.subaccount_id,
                    error = %e,
                    "Unable to list resources, requeuing item"
                );
                self.queue.insert(element).await;
                return ProcessOutcome::Requeued;
            }
        };

        if resources.is_empty() {
            info!(subaccount_id = %item.subaccount_id, "No resources found for subaccount");
            return ProcessOutcome::Dropped;
        }
        debug!(
            subaccount_id = %item.subaccount_id,
            count = resources.len(),
            "Found resources for subaccount"
        );

        // Every resource is attempted even after a failure; the item is
        // requeued as a whole.
        let mut retry_required = false;
        for resource in &resources {
            let updated = with_labels(resource, item);
            if let Err(e) = self.bounded(self.client.update_labels(&updated)).await {
                warn!(
                    subaccount_id = %item.subaccount_id,
                    resource = %resource.name(),
                    error = %e,
                    "Unable to update resource labels"
                );
                retry_required = true;
            }
        }

        if retry_required {
            debug!(subaccount_id = %item.subaccount_id, "Requeuing item");
            self.queue.insert(element).await;
            return ProcessOutcome::Requeued;
        }
        ProcessOutcome::Applied(resources.len())
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ResourceError>>,
    ) -> Result<T, ResourceError> {
        tokio::time::timeout(self.config.request_timeout, call)
            .await
            .map_err(|_| ResourceError::Timeout(self.config.request_timeout))?
    }
}

/// Copy of `resource` with the two target labels overwritten.
fn with_labels(resource: &Resource, item: &QueueItem) -> Resource {
    let mut updated = resource.clone();
    let labels = &mut updated.metadata.labels;
    labels.insert(BETA_ENABLED_LABEL.to_string(), item.beta_enabled.clone());
    labels.insert(
        USED_FOR_PRODUCTION_LABEL.to_string(),
        item.used_for_production.clone(),
    );
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{MockResourceClient, QueueElement};

    fn element(subaccount: &str, modified_at: i64) -> QueueElement {
        QueueElement {
            item: QueueItem::new(subaccount, true, false),
            modified_at,
        }
    }

    fn updater(client: MockResourceClient, queue: Arc<PriorityQueue>) -> LabelUpdater {
        LabelUpdater::new(Arc::new(client), queue, LabelUpdaterConfig::default())
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let updater = updater(MockResourceClient::new(), Arc::new(PriorityQueue::new()));
        assert_eq!(updater.process_next().await, ProcessOutcome::Empty);
    }

    #[tokio::test]
    async fn test_list_failure_requeues_unchanged() {
        let client = MockResourceClient::failing();
        let queue = Arc::new(PriorityQueue::new());
        queue.insert(element("S1", 7)).await;
        let updater = updater(client.clone(), queue.clone());

        assert_eq!(updater.process_next().await, ProcessOutcome::Requeued);

        assert_eq!(queue.extract().await, Some(element("S1", 7)));
        assert_eq!(client.list_calls().await, 1);
    }

    #[test]
    fn test_with_labels_keeps_other_labels() {
        let resource = Resource::new(NAMESPACE, "rt-1")
            .with_label(SUBACCOUNT_ID_LABEL, "S1")
            .with_label(BETA_ENABLED_LABEL, "false");
        let updated = with_labels(&resource, &QueueItem::new("S1", true, true));

        assert_eq!(updated.label(SUBACCOUNT_ID_LABEL), Some("S1"));
        assert_eq!(updated.label(BETA_ENABLED_LABEL), Some("true"));
        assert_eq!(updated.label(USED_FOR_PRODUCTION_LABEL), Some("true"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let updater = Arc::new(updater(
            MockResourceClient::new(),
            Arc::new(PriorityQueue::new()),
        ));
        let shutdown = updater.shutdown_handle();
        let handle = {
            let updater = updater.clone();
            tokio::spawn(async move { updater.run().await })
        };

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
