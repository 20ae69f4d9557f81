// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory storage backend.
//!
//! Each logical table has its own lock, so operation, instance and binding
//! traffic never contend. Locks are only held for the duration of a map access.
//! Intended for tests and embedded use; nothing survives a restart.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::collections::hash_map::Entry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::model::{InstanceFilter, OperationFilter, OperationState, OperationType};

use super::{
    BindingRow, InstanceCountRow, InstanceRow, LicenseTypeCountRow, OperationRow,
    OperationStatsRow, StorageBackend,
};

/// Storage backend keeping every row in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    operations: RwLock<HashMap<String, OperationRow>>,
    instances: RwLock<HashMap<String, InstanceRow>>,
    /// Keyed by `(instance_id, binding_id)`.
    bindings: RwLock<HashMap<(String, String), BindingRow>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select_operations<F>(&self, predicate: F) -> Vec<OperationRow>
    where
        F: Fn(&OperationRow) -> bool,
    {
        let mut rows: Vec<OperationRow> = {
            let operations = self.operations.read().await;
            operations.values().filter(|r| predicate(r)).cloned().collect()
        };
        newest_first(&mut rows);
        rows
    }

    /// Live instances matching `predicate`, oldest first.
    async fn select_live_instances<F>(&self, predicate: F) -> Vec<InstanceRow>
    where
        F: Fn(&InstanceRow) -> bool,
    {
        let mut rows: Vec<InstanceRow> = {
            let instances = self.instances.read().await;
            instances
                .values()
                .filter(|r| r.deleted_at.is_none() && predicate(r))
                .cloned()
                .collect()
        };
        rows.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        rows
    }
}

fn newest_first(rows: &mut [OperationRow]) {
    rows.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

fn any_of(values: &[String], value: &str) -> bool {
    values.is_empty() || values.iter().any(|v| v == value)
}

fn matches_filter(row: &InstanceRow, filter: &InstanceFilter) -> bool {
    any_of(&filter.instance_ids, &row.instance_id)
        && any_of(&filter.global_account_ids, &row.global_account_id)
        && any_of(&filter.subaccount_ids, &row.subaccount_id)
        && any_of(&filter.runtime_ids, &row.runtime_id)
        && any_of(&filter.regions, &row.provider_region)
        && any_of(&filter.plan_ids, &row.service_plan_id)
        && any_of(&filter.plan_names, &row.service_plan_name)
        && filter
            .expired
            .is_none_or(|expired| expired == row.expired_at.is_some())
}

fn license_type_of(row: &InstanceRow) -> Option<String> {
    let params: serde_json::Value = serde_json::from_str(&row.provisioning_parameters).ok()?;
    params
        .pointer("/ers_context/license_type")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn plan_id_of(row: &OperationRow) -> Option<String> {
    let params: serde_json::Value =
        serde_json::from_str(row.provisioning_parameters.as_deref()?).ok()?;
    params
        .get("plan_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_operation(&self, row: &OperationRow) -> Result<(), StorageError> {
        let mut operations = self.operations.write().await;
        match operations.entry(row.id.clone()) {
            Entry::Occupied(_) => Err(StorageError::already_exists("operation", &row.id)),
            Entry::Vacant(slot) => {
                slot.insert(row.clone());
                Ok(())
            }
        }
    }

    async fn get_operation_by_id(&self, id: &str) -> Result<Option<OperationRow>, StorageError> {
        Ok(self.operations.read().await.get(id).cloned())
    }

    async fn list_all_operations(&self) -> Result<Vec<OperationRow>, StorageError> {
        Ok(self.select_operations(|_| true).await)
    }

    async fn get_operations_for_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<OperationRow>, StorageError> {
        Ok(self.select_operations(|r| ids.contains(&r.id)).await)
    }

    async fn list_operations_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Vec<OperationRow>, StorageError> {
        Ok(self
            .select_operations(|r| r.instance_id == instance_id)
            .await)
    }

    async fn list_operations_by_type_and_instance_id(
        &self,
        instance_id: &str,
        operation_type: OperationType,
    ) -> Result<Vec<OperationRow>, StorageError> {
        Ok(self
            .select_operations(|r| {
                r.instance_id == instance_id && r.operation_type == operation_type.as_str()
            })
            .await)
    }

    async fn list_operations_by_type(
        &self,
        operation_type: OperationType,
    ) -> Result<Vec<OperationRow>, StorageError> {
        Ok(self
            .select_operations(|r| r.operation_type == operation_type.as_str())
            .await)
    }

    async fn list_operations_in_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OperationRow>, StorageError> {
        let within = |t: &DateTime<Utc>| *t >= from && *t <= to;
        Ok(self
            .select_operations(|r| within(&r.created_at) || within(&r.updated_at))
            .await)
    }

    async fn get_last_operation(
        &self,
        instance_id: &str,
        types: &[OperationType],
    ) -> Result<Option<OperationRow>, StorageError> {
        let rows = self
            .select_operations(|r| {
                r.instance_id == instance_id
                    && r.state != OperationState::Pending.as_str()
                    && (types.is_empty() || types.iter().any(|t| t.as_str() == r.operation_type))
            })
            .await;
        Ok(rows.into_iter().next())
    }

    async fn list_operations_by_type_and_state(
        &self,
        operation_type: OperationType,
        state: OperationState,
    ) -> Result<Vec<OperationRow>, StorageError> {
        Ok(self
            .select_operations(|r| {
                r.operation_type == operation_type.as_str() && r.state == state.as_str()
            })
            .await)
    }

    async fn list_operations(
        &self,
        filter: &OperationFilter,
    ) -> Result<(Vec<OperationRow>, i64), StorageError> {
        let rows = self
            .select_operations(|r| {
                filter.states.is_empty() || filter.states.iter().any(|s| s.as_str() == r.state)
            })
            .await;
        let total = rows.len() as i64;
        let page = rows
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.page_size as usize)
            .collect();
        Ok((page, total))
    }

    async fn operation_stats(
        &self,
        state: Option<OperationState>,
    ) -> Result<Vec<OperationStatsRow>, StorageError> {
        let mut groups: HashMap<(String, String, Option<String>), i64> = HashMap::new();
        {
            let operations = self.operations.read().await;
            for row in operations.values() {
                if state.is_some_and(|s| s.as_str() != row.state) {
                    continue;
                }
                let key = (row.operation_type.clone(), row.state.clone(), plan_id_of(row));
                *groups.entry(key).or_default() += 1;
            }
        }

        let mut stats: Vec<OperationStatsRow> = groups
            .into_iter()
            .map(|((operation_type, state, plan_id), count)| OperationStatsRow {
                operation_type,
                state,
                plan_id,
                count,
            })
            .collect();
        stats.sort_by_key(|s| Reverse(s.count));
        Ok(stats)
    }

    async fn update_operation(&self, row: &OperationRow) -> Result<u64, StorageError> {
        let mut operations = self.operations.write().await;
        match operations.get_mut(&row.id) {
            Some(stored) if stored.version == row.version => {
                *stored = OperationRow {
                    operation_type: stored.operation_type.clone(),
                    created_at: stored.created_at,
                    version: stored.version + 1,
                    ..row.clone()
                };
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn delete_operation(&self, id: &str) -> Result<(), StorageError> {
        self.operations.write().await.remove(id);
        Ok(())
    }

    async fn insert_instance(&self, row: &InstanceRow) -> Result<(), StorageError> {
        let mut instances = self.instances.write().await;
        match instances.entry(row.instance_id.clone()) {
            Entry::Occupied(_) => Err(StorageError::already_exists(
                "instance",
                &row.instance_id,
            )),
            Entry::Vacant(slot) => {
                slot.insert(row.clone());
                Ok(())
            }
        }
    }

    async fn get_instance_by_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceRow>, StorageError> {
        Ok(self.instances.read().await.get(instance_id).cloned())
    }

    async fn find_instances_for_subaccounts(
        &self,
        subaccount_ids: &[String],
    ) -> Result<Vec<InstanceRow>, StorageError> {
        let mut rows: Vec<InstanceRow> = {
            let instances = self.instances.read().await;
            instances
                .values()
                .filter(|r| subaccount_ids.contains(&r.subaccount_id))
                .cloned()
                .collect()
        };
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn find_instances_for_runtimes(
        &self,
        runtime_ids: &[String],
    ) -> Result<Vec<InstanceRow>, StorageError> {
        Ok(self
            .select_live_instances(|r| runtime_ids.contains(&r.runtime_id))
            .await)
    }

    async fn list_distinct_subaccounts(&self) -> Result<Vec<String>, StorageError> {
        let subaccounts: BTreeSet<String> = self
            .select_live_instances(|r| !r.subaccount_id.is_empty())
            .await
            .into_iter()
            .map(|r| r.subaccount_id)
            .collect();
        Ok(subaccounts.into_iter().collect())
    }

    async fn count_instances_for_global_account(
        &self,
        global_account_id: &str,
    ) -> Result<i64, StorageError> {
        let rows = self
            .select_live_instances(|r| r.global_account_id == global_account_id)
            .await;
        Ok(rows.len() as i64)
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<(Vec<InstanceRow>, i64), StorageError> {
        let rows = self
            .select_live_instances(|r| matches_filter(r, filter))
            .await;
        let total = rows.len() as i64;
        let page = rows
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.page_size as usize)
            .collect();
        Ok((page, total))
    }

    async fn active_instance_counts(&self) -> Result<Vec<InstanceCountRow>, StorageError> {
        let mut groups: HashMap<(String, String), i64> = HashMap::new();
        for row in self.select_live_instances(|_| true).await {
            *groups
                .entry((row.global_account_id, row.subaccount_id))
                .or_default() += 1;
        }
        Ok(groups
            .into_iter()
            .map(|((global_account_id, subaccount_id), count)| InstanceCountRow {
                global_account_id,
                subaccount_id,
                count,
            })
            .collect())
    }

    async fn license_type_counts(&self) -> Result<Vec<LicenseTypeCountRow>, StorageError> {
        let mut groups: HashMap<Option<String>, i64> = HashMap::new();
        for row in self.select_live_instances(|_| true).await {
            *groups.entry(license_type_of(&row)).or_default() += 1;
        }
        Ok(groups
            .into_iter()
            .map(|(license_type, count)| LicenseTypeCountRow {
                license_type,
                count,
            })
            .collect())
    }

    async fn list_deleted_instance_ids(&self, limit: i64) -> Result<Vec<String>, StorageError> {
        let mut deleted: Vec<(DateTime<Utc>, String)> = {
            let instances = self.instances.read().await;
            instances
                .values()
                .filter_map(|r| r.deleted_at.map(|at| (at, r.instance_id.clone())))
                .collect()
        };
        deleted.sort();
        Ok(deleted
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn update_instance(&self, row: &InstanceRow) -> Result<u64, StorageError> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(&row.instance_id) {
            Some(stored) if stored.version == row.version => {
                *stored = InstanceRow {
                    created_at: stored.created_at,
                    version: stored.version + 1,
                    ..row.clone()
                };
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<(), StorageError> {
        self.instances.write().await.remove(instance_id);
        Ok(())
    }

    async fn insert_binding(&self, row: &BindingRow) -> Result<(), StorageError> {
        let mut bindings = self.bindings.write().await;
        match bindings.entry((row.instance_id.clone(), row.id.clone())) {
            Entry::Occupied(_) => Err(StorageError::already_exists("binding", &row.id)),
            Entry::Vacant(slot) => {
                slot.insert(row.clone());
                Ok(())
            }
        }
    }

    async fn get_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> Result<Option<BindingRow>, StorageError> {
        let key = (instance_id.to_string(), binding_id.to_string());
        Ok(self.bindings.read().await.get(&key).cloned())
    }

    async fn update_binding(&self, row: &BindingRow) -> Result<u64, StorageError> {
        let mut bindings = self.bindings.write().await;
        match bindings.get_mut(&(row.instance_id.clone(), row.id.clone())) {
            Some(stored) => {
                *stored = BindingRow {
                    created_at: stored.created_at,
                    ..row.clone()
                };
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> Result<(), StorageError> {
        let key = (instance_id.to_string(), binding_id.to_string());
        self.bindings.write().await.remove(&key);
        Ok(())
    }

    async fn list_bindings(&self, instance_id: &str) -> Result<Vec<BindingRow>, StorageError> {
        let mut rows: Vec<BindingRow> = {
            let bindings = self.bindings.read().await;
            bindings
                .values()
                .filter(|b| b.instance_id == instance_id)
                .cloned()
                .collect()
        };
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn list_expired_bindings(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BindingRow>, StorageError> {
        let mut rows: Vec<BindingRow> = {
            let bindings = self.bindings.read().await;
            bindings
                .values()
                .filter(|b| b.expires_at < now)
                .cloned()
                .collect()
        };
        rows.sort_by(|a, b| a.expires_at.cmp(&b.expires_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn health_check(&self) -> Result<bool, StorageError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn row(id: &str, instance_id: &str, minutes_ago: i64) -> OperationRow {
        let at = Utc::now() - chrono::Duration::minutes(minutes_ago);
        OperationRow {
            id: id.to_string(),
            instance_id: instance_id.to_string(),
            operation_type: "provision".to_string(),
            state: "in progress".to_string(),
            description: String::new(),
            created_at: at,
            updated_at: at,
            version: 0,
            data: "{}".to_string(),
            provisioning_parameters: Some(r#"{"plan_id":"gcp"}"#.to_string()),
            finished_stages: None,
        }
    }

    #[tokio::test]
    async fn test_insert_is_atomic_on_duplicate() {
        let backend = MemoryBackend::new();
        let first = row("op-1", "inst-1", 0);
        backend.insert_operation(&first).await.unwrap();

        let mut second = first.clone();
        second.description = "overwrite attempt".to_string();
        let err = backend.insert_operation(&second).await.unwrap_err();

        assert!(err.is_already_exists());
        let stored = backend.get_operation_by_id("op-1").await.unwrap().unwrap();
        assert_eq!(stored.description, "");
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_keeps_identity() {
        let backend = MemoryBackend::new();
        let original = row("op-1", "inst-1", 10);
        backend.insert_operation(&original).await.unwrap();

        let mut changed = original.clone();
        changed.operation_type = "update".to_string();
        changed.created_at = Utc::now();
        changed.state = "succeeded".to_string();
        assert_eq!(backend.update_operation(&changed).await.unwrap(), 1);

        let stored = backend.get_operation_by_id("op-1").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.state, "succeeded");
        assert_eq!(stored.operation_type, "provision");
        assert_eq!(stored.created_at, original.created_at);
    }

    #[tokio::test]
    async fn test_concurrent_updates_single_winner() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_operation(&row("op-1", "inst-1", 0)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                let mut update = row("op-1", "inst-1", 0);
                update.description = format!("writer {}", i);
                backend.update_operation(&update).await.unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            applied += handle.await.unwrap();
        }
        assert_eq!(applied, 1);

        let stored = backend.get_operation_by_id("op-1").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_lists_are_newest_first() {
        let backend = MemoryBackend::new();
        backend.insert_operation(&row("old", "inst-1", 30)).await.unwrap();
        backend.insert_operation(&row("new", "inst-1", 1)).await.unwrap();
        backend.insert_operation(&row("mid", "inst-1", 10)).await.unwrap();
        backend.insert_operation(&row("other", "inst-2", 0)).await.unwrap();

        let ids: Vec<String> = backend
            .list_operations_by_instance_id("inst-1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn test_stats_read_plan_from_parameters() {
        let backend = MemoryBackend::new();
        backend.insert_operation(&row("a", "inst-1", 0)).await.unwrap();
        backend.insert_operation(&row("b", "inst-2", 0)).await.unwrap();

        let stats = backend.operation_stats(None).await.unwrap();
        assert_eq!(
            stats,
            vec![OperationStatsRow {
                operation_type: "provision".to_string(),
                state: "in progress".to_string(),
                plan_id: Some("gcp".to_string()),
                count: 2,
            }]
        );
    }
}
