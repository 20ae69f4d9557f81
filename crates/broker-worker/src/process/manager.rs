// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-modify-write of operations under optimistic locking.
//!
//! A mutation is applied to a copy of the operation and saved with the
//! version it was loaded at. On a conflict the operation is reloaded and the
//! mutation applied again, so mutations must be idempotent deltas ("clear
//! the runtime id"), never blind appends.

use std::time::Duration;

use broker_core::OperationStore;
use broker_core::model::{LastError, Operation, OperationKind, OperationState};
use tracing::{Span, debug, error, info, warn};

/// Backoff returned when the operation could not be saved.
pub const UPDATE_RETRY_BACKOFF: Duration = Duration::from_secs(60);

const DEFAULT_CONFLICT_ROUNDS: usize = 5;

#[derive(Debug, Clone)]
pub struct OperationManager {
    operations: OperationStore,
    max_conflict_rounds: usize,
}

impl OperationManager {
    pub fn new(operations: OperationStore) -> Self {
        Self {
            operations,
            max_conflict_rounds: DEFAULT_CONFLICT_ROUNDS,
        }
    }

    pub fn with_max_conflict_rounds(mut self, rounds: usize) -> Self {
        self.max_conflict_rounds = rounds.max(1);
        self
    }

    pub fn operations(&self) -> &OperationStore {
        &self.operations
    }

    /// Apply `mutate` and save, reloading and reapplying on conflict.
    ///
    /// Returns the saved operation and a zero backoff, or the unchanged input
    /// and [`UPDATE_RETRY_BACKOFF`] if it could not be saved.
    pub async fn update_operation<K, F>(
        &self,
        operation: Operation<K>,
        mutate: F,
        log: &Span,
    ) -> (Operation<K>, Duration)
    where
        K: OperationKind,
        F: Fn(&mut Operation<K>),
    {
        let mut candidate = operation.clone();
        mutate(&mut candidate);

        for round in 1..=self.max_conflict_rounds {
            match self.operations.update_operation(&candidate).await {
                Ok(saved) => return (saved, Duration::ZERO),
                Err(e) if e.is_conflict() => {
                    debug!(
                        parent: log,
                        round,
                        version = candidate.version,
                        "Operation modified concurrently, reloading"
                    );
                    match self.operations.get_by_id::<K>(&operation.id).await {
                        Ok(mut fresh) => {
                            mutate(&mut fresh);
                            candidate = fresh;
                        }
                        Err(e) => {
                            error!(parent: log, error = %e, "Unable to reload operation");
                            return (operation, UPDATE_RETRY_BACKOFF);
                        }
                    }
                }
                Err(e) => {
                    error!(parent: log, error = %e, "Unable to update operation");
                    return (operation, UPDATE_RETRY_BACKOFF);
                }
            }
        }

        warn!(
            parent: log,
            rounds = self.max_conflict_rounds,
            "Giving up on operation update after repeated conflicts"
        );
        (operation, UPDATE_RETRY_BACKOFF)
    }

    /// Mark the operation succeeded.
    pub async fn operation_succeeded<K: OperationKind>(
        &self,
        operation: Operation<K>,
        description: &str,
        log: &Span,
    ) -> (Operation<K>, Duration) {
        info!(parent: log, "Operation succeeded");
        self.update_operation(
            operation,
            |op| {
                op.state = OperationState::Succeeded;
                if !description.is_empty() {
                    op.description = description.to_string();
                }
            },
            log,
        )
        .await
    }

    /// Mark the operation failed, keeping `last_error` for inspection.
    pub async fn operation_failed<K: OperationKind>(
        &self,
        operation: Operation<K>,
        description: &str,
        last_error: Option<LastError>,
        log: &Span,
    ) -> (Operation<K>, Duration) {
        warn!(parent: log, description, "Operation failed");
        self.update_operation(
            operation,
            |op| {
                op.state = OperationState::Failed;
                op.description = description.to_string();
                if let Some(last_error) = &last_error {
                    op.last_error = Some(last_error.clone());
                }
            },
            log,
        )
        .await
    }

    /// Record the error of a rescheduled step without changing the state.
    pub async fn record_error<K: OperationKind>(
        &self,
        operation: Operation<K>,
        last_error: LastError,
        log: &Span,
    ) -> (Operation<K>, Duration) {
        self.update_operation(
            operation,
            |op| op.last_error = Some(last_error.clone()),
            log,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_core::model::DeprovisioningData;
    use broker_core::{AesCipher, BrokerStorage};
    use std::sync::Arc;

    fn storage() -> BrokerStorage {
        BrokerStorage::in_memory(Arc::new(AesCipher::new("manager-test").unwrap()))
    }

    #[tokio::test]
    async fn test_update_applies_mutation() {
        let storage = storage();
        let manager = OperationManager::new(storage.operations().clone());
        let mut op = Operation::new("op-1", "inst-1", DeprovisioningData::default());
        op.instance_details.runtime_id = "rt-1".to_string();
        storage.operations().insert_operation(&op).await.unwrap();

        let (saved, backoff) = manager
            .update_operation(op, |o| o.instance_details.runtime_id.clear(), &Span::none())
            .await;

        assert_eq!(backoff, Duration::ZERO);
        assert_eq!(saved.version, 1);
        assert_eq!(saved.instance_details.runtime_id, "");
    }

    #[tokio::test]
    async fn test_conflict_reloads_and_reapplies() {
        let storage = storage();
        let manager = OperationManager::new(storage.operations().clone());
        let op = Operation::new("op-1", "inst-1", DeprovisioningData::default());
        storage.operations().insert_operation(&op).await.unwrap();

        // Another worker wins the race first.
        let mut other = op.clone();
        other.description = "changed elsewhere".to_string();
        storage.operations().update_operation(&other).await.unwrap();

        let (saved, backoff) = manager
            .update_operation(op, |o| o.payload.temporary = true, &Span::none())
            .await;

        assert_eq!(backoff, Duration::ZERO);
        assert_eq!(saved.version, 2);
        assert!(saved.payload.temporary);
        assert_eq!(saved.description, "changed elsewhere");
    }

    #[tokio::test]
    async fn test_missing_operation_yields_backoff() {
        let storage = storage();
        let manager = OperationManager::new(storage.operations().clone());
        let op = Operation::new("op-1", "inst-1", DeprovisioningData::default());

        let (returned, backoff) = manager
            .update_operation(op.clone(), |o| o.description = "x".to_string(), &Span::none())
            .await;

        assert_eq!(backoff, UPDATE_RETRY_BACKOFF);
        assert_eq!(returned, op);
    }

    #[tokio::test]
    async fn test_operation_failed_keeps_last_error() {
        let storage = storage();
        let manager = OperationManager::new(storage.operations().clone());
        let op = Operation::new("op-1", "inst-1", DeprovisioningData::default());
        storage.operations().insert_operation(&op).await.unwrap();
        let last_error = LastError {
            component: broker_core::model::ErrorComponent::Dependency,
            step: "Remove_Instance".to_string(),
            message: "database unavailable".to_string(),
        };

        let (saved, _) = manager
            .operation_failed(op, "retry budget exhausted", Some(last_error.clone()), &Span::none())
            .await;

        assert_eq!(saved.state, OperationState::Failed);
        assert_eq!(saved.last_error, Some(last_error));
        let stored = storage
            .operations()
            .get_deprovisioning_operation_by_id("op-1")
            .await
            .unwrap();
        assert_eq!(stored.state, OperationState::Failed);
    }
}
