// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::error::StorageError;
use crate::model::{ErsContextStats, Instance, InstanceFilter, InstancePage, InstanceStats};
use crate::persistence::StorageBackend;
use crate::retry::Retrier;

use super::codec::Codec;
use super::operations::OperationStore;

const ENTITY: &str = "instance";

/// Instance store.
///
/// Reads overlay `instance_details` from the instance's latest non-pending
/// operation, since the details are only stored with operations.
#[derive(Clone)]
pub struct InstanceStore {
    backend: Arc<dyn StorageBackend>,
    codec: Codec,
    retrier: Retrier,
    operations: OperationStore,
}

impl std::fmt::Debug for InstanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceStore")
            .field("retrier", &self.retrier)
            .finish_non_exhaustive()
    }
}

impl InstanceStore {
    pub(crate) fn new(
        backend: Arc<dyn StorageBackend>,
        codec: Codec,
        retrier: Retrier,
        operations: OperationStore,
    ) -> Self {
        Self {
            backend,
            codec,
            retrier,
            operations,
        }
    }

    pub async fn insert(&self, instance: &Instance) -> Result<(), StorageError> {
        let row = self.codec.encode_instance(instance)?;
        self.retrier
            .run("insert_instance", || self.backend.insert_instance(&row))
            .await
    }

    pub async fn get_by_id(&self, instance_id: &str) -> Result<Instance, StorageError> {
        let row = self
            .retrier
            .run("get_instance_by_id", || {
                self.backend.get_instance_by_id(instance_id)
            })
            .await?
            .ok_or_else(|| StorageError::not_found(ENTITY, instance_id))?;
        let mut instance = self.codec.decode_instance(row)?;

        self.overlay_details(&mut instance).await?;
        Ok(instance)
    }

    /// Version-checked update. Returns the instance with its bumped version.
    pub async fn update(&self, instance: &Instance) -> Result<Instance, StorageError> {
        let mut updated = instance.clone();
        updated.updated_at = Utc::now();
        let row = self.codec.encode_instance(&updated)?;

        let affected = self
            .retrier
            .run("update_instance", || self.backend.update_instance(&row))
            .await?;

        if affected == 0 {
            let exists = self
                .retrier
                .run("get_instance_by_id", || {
                    self.backend.get_instance_by_id(&instance.instance_id)
                })
                .await?
                .is_some();
            if !exists {
                return Err(StorageError::not_found(ENTITY, &instance.instance_id));
            }
            return Err(StorageError::conflict(
                ENTITY,
                &instance.instance_id,
                instance.version,
            ));
        }

        updated.version += 1;
        Ok(updated)
    }

    /// Hard delete. Deleting a missing instance succeeds.
    pub async fn delete(&self, instance_id: &str) -> Result<(), StorageError> {
        self.retrier
            .run("delete_instance", || self.backend.delete_instance(instance_id))
            .await
    }

    pub async fn find_all_instances_for_subaccounts(
        &self,
        subaccount_ids: &[String],
    ) -> Result<Vec<Instance>, StorageError> {
        if subaccount_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .retrier
            .run("find_instances_for_subaccounts", || {
                self.backend.find_instances_for_subaccounts(subaccount_ids)
            })
            .await?;
        rows.into_iter()
            .map(|row| self.codec.decode_instance(row))
            .collect()
    }

    /// Live instances on any of the given runtimes. Fails with `NotFound`
    /// when none match.
    pub async fn find_all_instances_for_runtimes(
        &self,
        runtime_ids: &[String],
    ) -> Result<Vec<Instance>, StorageError> {
        let rows = if runtime_ids.is_empty() {
            Vec::new()
        } else {
            self.retrier
                .run("find_instances_for_runtimes", || {
                    self.backend.find_instances_for_runtimes(runtime_ids)
                })
                .await?
        };
        if rows.is_empty() {
            return Err(StorageError::not_found(ENTITY, runtime_ids.join(",")));
        }
        rows.into_iter()
            .map(|row| self.codec.decode_instance(row))
            .collect()
    }

    /// Subaccounts owning at least one live instance, sorted.
    pub async fn get_distinct_subaccounts(&self) -> Result<Vec<String>, StorageError> {
        self.retrier
            .run("list_distinct_subaccounts", || {
                self.backend.list_distinct_subaccounts()
            })
            .await
    }

    pub async fn get_number_of_instances_for_global_account_id(
        &self,
        global_account_id: &str,
    ) -> Result<i64, StorageError> {
        self.retrier
            .run("count_instances_for_global_account", || {
                self.backend.count_instances_for_global_account(global_account_id)
            })
            .await
    }

    /// One page of live instances, oldest first, with the total match count.
    pub async fn list(&self, filter: &InstanceFilter) -> Result<InstancePage, StorageError> {
        let (rows, total_count) = self
            .retrier
            .run("list_instances", || self.backend.list_instances(filter))
            .await?;
        let mut instances = Vec::with_capacity(rows.len());
        for row in rows {
            let mut instance = self.codec.decode_instance(row)?;
            self.overlay_details(&mut instance).await?;
            instances.push(instance);
        }
        Ok(InstancePage {
            count: instances.len(),
            instances,
            total_count,
        })
    }

    pub async fn get_active_instance_stats(&self) -> Result<InstanceStats, StorageError> {
        let rows = self
            .retrier
            .run("active_instance_counts", || {
                self.backend.active_instance_counts()
            })
            .await?;

        let mut stats = InstanceStats::default();
        for row in rows {
            stats.total_number_of_instances += row.count;
            *stats
                .per_global_account_id
                .entry(row.global_account_id)
                .or_default() += row.count;
            *stats.per_subaccount_id.entry(row.subaccount_id).or_default() += row.count;
        }
        Ok(stats)
    }

    pub async fn get_ers_context_stats(&self) -> Result<ErsContextStats, StorageError> {
        let rows = self
            .retrier
            .run("license_type_counts", || self.backend.license_type_counts())
            .await?;

        let mut license_type: HashMap<String, i64> = HashMap::new();
        for row in rows {
            *license_type.entry(row.license_type.unwrap_or_default()).or_default() += row.count;
        }
        Ok(ErsContextStats { license_type })
    }

    /// Ids of soft-deleted instances, at most `limit` of them.
    pub async fn list_deleted_instance_ids(
        &self,
        limit: i64,
    ) -> Result<Vec<String>, StorageError> {
        self.retrier
            .run("list_deleted_instance_ids", || {
                self.backend.list_deleted_instance_ids(limit)
            })
            .await
    }

    async fn overlay_details(&self, instance: &mut Instance) -> Result<(), StorageError> {
        match self.operations.get_last_operation(&instance.instance_id).await {
            Ok(last) => instance.instance_details = last.instance_details,
            Err(e) if e.is_not_found() => {
                debug!(
                    instance_id = %instance.instance_id,
                    "No finished operation to take instance details from"
                );
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
