// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Final deprovisioning step: detach or remove the instance record.
//!
//! Three outcomes depending on the operation:
//!
//! | Operation | Instance | Operation afterwards |
//! |-----------|----------|----------------------|
//! | `temporary` (suspension) | runtime id cleared | runtime id cleared |
//! | `executed_but_not_completed` set | `deleted_at` set, row kept | unchanged |
//! | otherwise | row deleted | ERS user id scrubbed |
//!
//! Storage failures never fail the operation; they turn into a short backoff.

use std::time::Duration;

use async_trait::async_trait;
use broker_core::model::{DeprovisioningData, DeprovisioningOperation};
use broker_core::{BrokerStorage, InstanceStore};
use chrono::Utc;
use tracing::{Span, error, info, warn};

use crate::process::{OperationManager, Step, StepResult};

const STORAGE_BACKOFF: Duration = Duration::from_secs(1);
const DELETE_BACKOFF: Duration = Duration::from_secs(10);

pub struct RemoveInstanceStep {
    instances: InstanceStore,
    manager: OperationManager,
}

impl RemoveInstanceStep {
    pub const NAME: &'static str = "Remove_Instance";

    pub fn new(storage: &BrokerStorage) -> Self {
        Self {
            instances: storage.instances().clone(),
            manager: OperationManager::new(storage.operations().clone()),
        }
    }

    async fn remove_runtime_id_from_instance(&self, instance_id: &str, log: &Span) -> Duration {
        let mut instance = match self.instances.get_by_id(instance_id).await {
            Ok(instance) => instance,
            Err(e) => {
                error!(parent: log, error = %e, "Unable to get instance from the storage");
                return STORAGE_BACKOFF;
            }
        };

        // An empty runtime id means no runtime exists any more.
        instance.runtime_id.clear();
        if let Err(e) = self.instances.update(&instance).await {
            error!(parent: log, error = %e, "Unable to update instance in the storage");
            return STORAGE_BACKOFF;
        }
        Duration::ZERO
    }

    async fn mark_instance_for_retry(&self, instance_id: &str, log: &Span) -> Duration {
        let mut instance = match self.instances.get_by_id(instance_id).await {
            Ok(instance) => instance,
            Err(e) if e.is_not_found() => {
                warn!(parent: log, "Instance not found");
                return Duration::ZERO;
            }
            Err(e) => {
                error!(parent: log, error = %e, "Unable to get instance from the storage");
                return STORAGE_BACKOFF;
            }
        };

        instance.deleted_at = Some(Utc::now());
        if let Err(e) = self.instances.update(&instance).await {
            error!(parent: log, error = %e, "Unable to update instance in the storage");
            return STORAGE_BACKOFF;
        }
        Duration::ZERO
    }

    async fn remove_instance_permanently(&self, instance_id: &str, log: &Span) -> Duration {
        if let Err(e) = self.instances.delete(instance_id).await {
            error!(parent: log, error = %e, "Unable to remove instance from the storage");
            return DELETE_BACKOFF;
        }
        Duration::ZERO
    }
}

#[async_trait]
impl Step<DeprovisioningData> for RemoveInstanceStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(
        &self,
        operation: DeprovisioningOperation,
        log: &Span,
    ) -> StepResult<DeprovisioningData> {
        match self.instances.get_by_id(&operation.instance_id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                info!(parent: log, "Instance already deleted");
                return StepResult::done(operation);
            }
            Err(e) => {
                error!(parent: log, error = %e, "Unable to get instance from the storage");
                return StepResult::retry(operation, STORAGE_BACKOFF);
            }
        }

        if operation.payload.temporary {
            info!(parent: log, "Removing the runtime id from the instance");
            let backoff = self
                .remove_runtime_id_from_instance(&operation.instance_id, log)
                .await;
            if !backoff.is_zero() {
                return StepResult::retry(operation, backoff);
            }

            info!(parent: log, "Removing the runtime id from the operation");
            let (operation, backoff) = self
                .manager
                .update_operation(
                    operation,
                    |op| op.instance_details.runtime_id.clear(),
                    log,
                )
                .await;
            StepResult::retry(operation, backoff)
        } else if let Some(steps) = &operation.payload.executed_but_not_completed {
            info!(
                parent: log,
                steps = %steps.join(", "),
                "Marking the instance as needing a retry of some steps"
            );
            let backoff = self
                .mark_instance_for_retry(&operation.instance_id, log)
                .await;
            StepResult::retry(operation, backoff)
        } else {
            info!(parent: log, "Removing the instance permanently");
            let backoff = self
                .remove_instance_permanently(&operation.instance_id, log)
                .await;
            if !backoff.is_zero() {
                return StepResult::retry(operation, backoff);
            }

            info!(parent: log, "Removing the user id from the operation");
            let (operation, backoff) = self
                .manager
                .update_operation(
                    operation,
                    |op| op.provisioning_parameters.ers_context.user_id.clear(),
                    log,
                )
                .await;
            StepResult::retry(operation, backoff)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_core::AesCipher;
    use broker_core::model::{Instance, Operation, ProvisioningParameters};
    use std::sync::Arc;

    fn storage() -> BrokerStorage {
        BrokerStorage::in_memory(Arc::new(AesCipher::new("remove-instance-test").unwrap()))
    }

    #[tokio::test]
    async fn test_missing_instance_is_already_done() {
        let storage = storage();
        let step = RemoveInstanceStep::new(&storage);
        let op = Operation::new("op-1", "gone", DeprovisioningData::default());

        let result = step.run(op.clone(), &Span::none()).await;

        assert!(result.is_done());
        assert_eq!(result.operation, op);
    }

    #[tokio::test]
    async fn test_executed_but_not_completed_marks_deleted_at() {
        let storage = storage();
        let step = RemoveInstanceStep::new(&storage);
        let instance = Instance::new("inst-1", ProvisioningParameters::default());
        storage.instances().insert(&instance).await.unwrap();
        let op = Operation::new(
            "op-1",
            "inst-1",
            DeprovisioningData {
                temporary: false,
                executed_but_not_completed: Some(vec!["Deprovision_Runtime".to_string()]),
            },
        );

        let result = step.run(op, &Span::none()).await;

        assert!(result.is_done());
        let stored = storage.instances().get_by_id("inst-1").await.unwrap();
        assert!(stored.is_deleted());
    }
}
