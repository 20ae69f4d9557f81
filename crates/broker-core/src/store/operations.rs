// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed, encrypted, retrying access to operations.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::StorageError;
use crate::model::{
    DeprovisioningData, DeprovisioningOperation, GroupedOperations, Operation, OperationFilter,
    OperationKind, OperationPage, OperationState, OperationStats, OperationStatsV2, OperationType,
    Payload, ProvisioningData, ProvisioningOperation, UpdatingData, UpdatingOperation,
    UpgradeClusterData, UpgradeClusterOperation,
};
use crate::persistence::{OperationRow, StorageBackend};
use crate::retry::Retrier;

use super::codec::Codec;

const ENTITY: &str = "operation";

/// Operation store.
///
/// Wraps a [`StorageBackend`] with encryption of sensitive parameters,
/// typed views and a bounded retry around every backend call. Conflicts are
/// returned to the caller, never retried here.
#[derive(Clone)]
pub struct OperationStore {
    backend: Arc<dyn StorageBackend>,
    codec: Codec,
    retrier: Retrier,
}

impl std::fmt::Debug for OperationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationStore")
            .field("backend", &"...")
            .field("retrier", &self.retrier)
            .finish()
    }
}

impl OperationStore {
    pub(crate) fn new(backend: Arc<dyn StorageBackend>, codec: Codec, retrier: Retrier) -> Self {
        Self {
            backend,
            codec,
            retrier,
        }
    }

    // ========================================================================
    // Generic core
    // ========================================================================

    /// Insert a new operation. Fails with `AlreadyExists` if the id is taken.
    pub async fn insert_operation<P: Payload>(
        &self,
        operation: &Operation<P>,
    ) -> Result<(), StorageError> {
        let row = self.codec.encode_operation(operation)?;
        self.retrier
            .run("insert_operation", || self.backend.insert_operation(&row))
            .await
    }

    pub async fn get_operation_by_id(&self, id: &str) -> Result<Operation, StorageError> {
        let row = self.fetch_row(id).await?;
        self.codec.decode_operation(row)
    }

    /// Version-checked update of any operation.
    ///
    /// `operation.version` must equal the stored version. On success the
    /// returned operation carries the bumped version and the refreshed
    /// `updated_at`; on `Conflict` storage is unchanged.
    pub async fn update_operation<P: Payload>(
        &self,
        operation: &Operation<P>,
    ) -> Result<Operation<P>, StorageError> {
        let mut updated = operation.clone();
        updated.updated_at = Utc::now();
        let row = self.codec.encode_operation(&updated)?;

        let affected = self
            .retrier
            .run("update_operation", || self.backend.update_operation(&row))
            .await?;

        if affected == 0 {
            // Missing row or stale version; re-read to tell them apart.
            self.fetch_row(&operation.id).await?;
            return Err(StorageError::conflict(
                ENTITY,
                &operation.id,
                operation.version,
            ));
        }

        updated.version += 1;
        Ok(updated)
    }

    /// Every stored operation, newest-first.
    pub async fn get_all_operations(&self) -> Result<Vec<Operation>, StorageError> {
        let rows = self
            .retrier
            .run("list_all_operations", || self.backend.list_all_operations())
            .await?;
        self.decode_all(rows)
    }

    pub async fn get_operations_for_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<Operation>, StorageError> {
        let rows = self
            .retrier
            .run("get_operations_for_ids", || {
                self.backend.get_operations_for_ids(ids)
            })
            .await?;
        if rows.is_empty() {
            return Err(StorageError::not_found(ENTITY, ids.join(",")));
        }
        self.decode_all(rows)
    }

    /// All operations of an instance, newest-first.
    pub async fn list_operations_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Vec<Operation>, StorageError> {
        let rows = self
            .retrier
            .run("list_operations_by_instance_id", || {
                self.backend.list_operations_by_instance_id(instance_id)
            })
            .await?;
        self.decode_all(rows)
    }

    /// Operations created or updated within `[from, to]`.
    pub async fn list_operations_in_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Operation>, StorageError> {
        let rows = self
            .retrier
            .run("list_operations_in_time_range", || {
                self.backend.list_operations_in_time_range(from, to)
            })
            .await?;
        self.decode_all(rows)
    }

    pub async fn list_operations(
        &self,
        filter: &OperationFilter,
    ) -> Result<OperationPage, StorageError> {
        let (rows, total_count) = self
            .retrier
            .run("list_operations", || self.backend.list_operations(filter))
            .await?;
        let operations = self.decode_all(rows)?;
        Ok(OperationPage {
            count: operations.len(),
            operations,
            total_count,
        })
    }

    /// In-progress operations of the given type.
    pub async fn get_not_finished_operations_by_type(
        &self,
        operation_type: OperationType,
    ) -> Result<Vec<Operation>, StorageError> {
        let rows = self
            .retrier
            .run("get_not_finished_operations_by_type", || {
                self.backend
                    .list_operations_by_type_and_state(operation_type, OperationState::InProgress)
            })
            .await?;
        self.decode_all(rows)
    }

    /// Latest non-pending operation of the instance.
    pub async fn get_last_operation(&self, instance_id: &str) -> Result<Operation, StorageError> {
        self.get_last_operation_by_types(instance_id, &[]).await
    }

    /// Latest non-pending operation of the instance among `types`.
    pub async fn get_last_operation_by_types(
        &self,
        instance_id: &str,
        types: &[OperationType],
    ) -> Result<Operation, StorageError> {
        let row = self
            .retrier
            .run("get_last_operation", || {
                self.backend.get_last_operation(instance_id, types)
            })
            .await?
            .ok_or_else(|| StorageError::not_found("last operation for instance", instance_id))?;
        self.codec.decode_operation(row)
    }

    /// Administrative purge. Deleting a missing id succeeds.
    pub async fn delete_by_id(&self, id: &str) -> Result<(), StorageError> {
        self.retrier
            .run("delete_operation", || self.backend.delete_operation(id))
            .await
    }

    // ========================================================================
    // Typed views
    // ========================================================================

    /// Load an operation as the typed view `K`.
    ///
    /// A stored operation of a different type is reported as not found.
    pub async fn get_by_id<K: OperationKind>(&self, id: &str) -> Result<Operation<K>, StorageError> {
        let row = self.fetch_row(id).await?;
        if row.operation_type != K::TYPE.as_str() {
            debug!(
                operation_id = id,
                expected = %K::TYPE,
                actual = %row.operation_type,
                "Operation type mismatch"
            );
            return Err(StorageError::not_found(ENTITY, id));
        }
        self.codec.decode_operation(row)?.try_into_kind()
    }

    /// Most recently created operation of kind `K` for the instance.
    pub async fn get_by_instance_id<K: OperationKind>(
        &self,
        instance_id: &str,
    ) -> Result<Operation<K>, StorageError> {
        let row = self
            .typed_rows::<K>(instance_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::not_found(ENTITY, instance_id))?;
        self.codec.decode_operation(row)?.try_into_kind()
    }

    /// Operations of kind `K` for the instance, newest-first.
    pub async fn list_by_instance_id<K: OperationKind>(
        &self,
        instance_id: &str,
    ) -> Result<Vec<Operation<K>>, StorageError> {
        self.typed_rows::<K>(instance_id)
            .await?
            .into_iter()
            .map(|row| self.codec.decode_operation(row)?.try_into_kind())
            .collect()
    }

    /// Every operation of kind `K`, newest-first.
    pub async fn list_by_type<K: OperationKind>(&self) -> Result<Vec<Operation<K>>, StorageError> {
        let rows = self
            .retrier
            .run("list_operations_by_type", || {
                self.backend.list_operations_by_type(K::TYPE)
            })
            .await?;
        rows.into_iter()
            .map(|row| self.codec.decode_operation(row)?.try_into_kind())
            .collect()
    }

    /// Partition an instance's operations by type.
    ///
    /// Provision and deprovision lists are newest-first, upgrade and update
    /// lists oldest-first.
    pub async fn list_operations_by_instance_id_group_by_type(
        &self,
        instance_id: &str,
    ) -> Result<GroupedOperations, StorageError> {
        let mut grouped = GroupedOperations::default();

        for operation in self.list_operations_by_instance_id(instance_id).await? {
            match operation.operation_type() {
                OperationType::Provision => grouped
                    .provision_operations
                    .push(operation.try_into_kind()?),
                OperationType::Deprovision => grouped
                    .deprovision_operations
                    .push(operation.try_into_kind()?),
                OperationType::UpgradeCluster => grouped
                    .upgrade_cluster_operations
                    .push(operation.try_into_kind()?),
                OperationType::Update => grouped.update_operations.push(operation.try_into_kind()?),
                OperationType::UpgradeKyma => {
                    // Legacy type, intentionally left out of the grouping.
                    debug!(
                        operation_id = %operation.id,
                        instance_id,
                        "Skipping legacy operation type while grouping"
                    );
                }
            }
        }

        grouped.upgrade_cluster_operations.sort_by_key(|o| o.created_at);
        grouped.update_operations.sort_by_key(|o| o.created_at);
        Ok(grouped)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Provisioning and deprovisioning state counts per plan.
    pub async fn get_operation_stats_by_plan(
        &self,
    ) -> Result<HashMap<String, OperationStats>, StorageError> {
        let rows = self
            .retrier
            .run("operation_stats", || self.backend.operation_stats(None))
            .await?;

        let mut stats: HashMap<String, OperationStats> = HashMap::new();
        for row in rows {
            let Some(plan_id) = row.plan_id.filter(|p| !p.is_empty()) else {
                continue;
            };
            let state: OperationState = row.state.parse()?;
            let entry = stats.entry(plan_id).or_default();
            match row.operation_type.parse::<OperationType>()? {
                OperationType::Provision => {
                    *entry.provisioning.entry(state).or_default() += row.count
                }
                OperationType::Deprovision => {
                    *entry.deprovisioning.entry(state).or_default() += row.count
                }
                _ => {}
            }
        }
        Ok(stats)
    }

    /// In-progress operation counts per `(plan, type, state)`.
    pub async fn get_operation_stats_by_plan_v2(
        &self,
    ) -> Result<Vec<OperationStatsV2>, StorageError> {
        let rows = self
            .retrier
            .run("operation_stats", || {
                self.backend.operation_stats(Some(OperationState::InProgress))
            })
            .await?;

        rows.into_iter()
            .filter_map(|row| {
                let plan_id = row.plan_id.filter(|p| !p.is_empty())?;
                Some((plan_id, row.operation_type, row.state, row.count))
            })
            .map(|(plan_id, operation_type, state, count)| -> Result<_, StorageError> {
                Ok(OperationStatsV2 {
                    plan_id,
                    operation_type: operation_type.parse()?,
                    state: state.parse()?,
                    count,
                })
            })
            .collect()
    }

    // ========================================================================
    // Named views
    // ========================================================================

    pub async fn insert_provisioning_operation(
        &self,
        operation: &ProvisioningOperation,
    ) -> Result<(), StorageError> {
        self.insert_operation(operation).await
    }

    pub async fn get_provisioning_operation_by_id(
        &self,
        id: &str,
    ) -> Result<ProvisioningOperation, StorageError> {
        self.get_by_id::<ProvisioningData>(id).await
    }

    pub async fn get_provisioning_operation_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<ProvisioningOperation, StorageError> {
        self.get_by_instance_id::<ProvisioningData>(instance_id)
            .await
    }

    pub async fn update_provisioning_operation(
        &self,
        operation: &ProvisioningOperation,
    ) -> Result<ProvisioningOperation, StorageError> {
        self.update_operation(operation).await
    }

    pub async fn list_provisioning_operations_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Vec<ProvisioningOperation>, StorageError> {
        self.list_by_instance_id::<ProvisioningData>(instance_id)
            .await
    }

    pub async fn insert_deprovisioning_operation(
        &self,
        operation: &DeprovisioningOperation,
    ) -> Result<(), StorageError> {
        self.insert_operation(operation).await
    }

    pub async fn get_deprovisioning_operation_by_id(
        &self,
        id: &str,
    ) -> Result<DeprovisioningOperation, StorageError> {
        self.get_by_id::<DeprovisioningData>(id).await
    }

    pub async fn get_deprovisioning_operation_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<DeprovisioningOperation, StorageError> {
        self.get_by_instance_id::<DeprovisioningData>(instance_id)
            .await
    }

    pub async fn update_deprovisioning_operation(
        &self,
        operation: &DeprovisioningOperation,
    ) -> Result<DeprovisioningOperation, StorageError> {
        self.update_operation(operation).await
    }

    pub async fn list_deprovisioning_operations_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Vec<DeprovisioningOperation>, StorageError> {
        self.list_by_instance_id::<DeprovisioningData>(instance_id)
            .await
    }

    pub async fn list_deprovisioning_operations(
        &self,
    ) -> Result<Vec<DeprovisioningOperation>, StorageError> {
        self.list_by_type::<DeprovisioningData>().await
    }

    pub async fn insert_upgrade_cluster_operation(
        &self,
        operation: &UpgradeClusterOperation,
    ) -> Result<(), StorageError> {
        self.insert_operation(operation).await
    }

    pub async fn get_upgrade_cluster_operation_by_id(
        &self,
        id: &str,
    ) -> Result<UpgradeClusterOperation, StorageError> {
        self.get_by_id::<UpgradeClusterData>(id).await
    }

    pub async fn update_upgrade_cluster_operation(
        &self,
        operation: &UpgradeClusterOperation,
    ) -> Result<UpgradeClusterOperation, StorageError> {
        self.update_operation(operation).await
    }

    pub async fn list_upgrade_cluster_operations_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Vec<UpgradeClusterOperation>, StorageError> {
        self.list_by_instance_id::<UpgradeClusterData>(instance_id)
            .await
    }

    pub async fn insert_updating_operation(
        &self,
        operation: &UpdatingOperation,
    ) -> Result<(), StorageError> {
        self.insert_operation(operation).await
    }

    pub async fn get_updating_operation_by_id(
        &self,
        id: &str,
    ) -> Result<UpdatingOperation, StorageError> {
        self.get_by_id::<UpdatingData>(id).await
    }

    pub async fn update_updating_operation(
        &self,
        operation: &UpdatingOperation,
    ) -> Result<UpdatingOperation, StorageError> {
        self.update_operation(operation).await
    }

    /// Updating operations of the instance, oldest-first.
    pub async fn list_updating_operations_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Vec<UpdatingOperation>, StorageError> {
        let mut operations = self.list_by_instance_id::<UpdatingData>(instance_id).await?;
        operations.sort_by_key(|o| o.created_at);
        Ok(operations)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn fetch_row(&self, id: &str) -> Result<OperationRow, StorageError> {
        self.retrier
            .run("get_operation_by_id", || self.backend.get_operation_by_id(id))
            .await?
            .ok_or_else(|| StorageError::not_found(ENTITY, id))
    }

    async fn typed_rows<K: OperationKind>(
        &self,
        instance_id: &str,
    ) -> Result<Vec<OperationRow>, StorageError> {
        self.retrier
            .run("list_operations_by_type_and_instance_id", || {
                self.backend
                    .list_operations_by_type_and_instance_id(instance_id, K::TYPE)
            })
            .await
    }

    fn decode_all(&self, rows: Vec<OperationRow>) -> Result<Vec<Operation>, StorageError> {
        rows.into_iter()
            .map(|row| self.codec.decode_operation(row))
            .collect()
    }
}
