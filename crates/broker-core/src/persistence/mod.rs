// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage backend adapter and its implementations.
//!
//! Backends move raw rows. They know nothing about typed views, encryption
//! or retries; the stores in [`crate::store`] add those on top. Every
//! backend honours the same contract:
//!
//! - inserts fail with [`StorageError::AlreadyExists`] on a duplicate key,
//!   decided atomically by the backend itself;
//! - updates only apply when the stored version equals the row's version,
//!   bump it by one, and report the number of rows affected;
//! - list queries return operations newest-first by `created_at`;
//! - instance listings and counts skip soft-deleted instances, except the
//!   lookups by id.

pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use self::memory::MemoryBackend;
pub use self::postgres::PostgresBackend;
pub use self::sqlite::SqliteBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::model::{InstanceFilter, OperationFilter, OperationState, OperationType};

/// Stored form of an operation.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OperationRow {
    pub id: String,
    pub instance_id: String,
    pub operation_type: String,
    pub state: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
    /// JSON document: instance details, last error and the kind payload.
    pub data: String,
    /// JSON with sensitive fields encrypted.
    pub provisioning_parameters: Option<String>,
    /// Comma separated stage names.
    pub finished_stages: Option<String>,
}

/// Stored form of an instance.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct InstanceRow {
    pub instance_id: String,
    pub runtime_id: String,
    pub global_account_id: String,
    pub subaccount_id: String,
    pub service_plan_id: String,
    pub service_plan_name: String,
    pub provider_region: String,
    pub provisioning_parameters: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub version: i32,
}

/// Stored form of a binding.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct BindingRow {
    pub id: String,
    pub instance_id: String,
    /// Encrypted.
    pub kubeconfig: String,
    pub expiration_seconds: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Live instances of one `(global account, subaccount)` pair.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct InstanceCountRow {
    pub global_account_id: String,
    pub subaccount_id: String,
    pub count: i64,
}

/// Live instances sharing one license type.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LicenseTypeCountRow {
    pub license_type: Option<String>,
    pub count: i64,
}

/// One `(type, state, plan)` group with its size.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OperationStatsRow {
    pub operation_type: String,
    pub state: String,
    pub plan_id: Option<String>,
    pub count: i64,
}

/// Raw persistence of operation and instance records.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Operations
    // ========================================================================

    /// Insert a new operation. Fails with `AlreadyExists` if the id is taken.
    async fn insert_operation(&self, row: &OperationRow) -> Result<(), StorageError>;

    async fn get_operation_by_id(&self, id: &str) -> Result<Option<OperationRow>, StorageError>;

    /// Every operation, newest-first.
    async fn list_all_operations(&self) -> Result<Vec<OperationRow>, StorageError>;

    async fn get_operations_for_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<OperationRow>, StorageError>;

    /// All operations of an instance, newest-first.
    async fn list_operations_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Vec<OperationRow>, StorageError>;

    /// Operations of one type for an instance, newest-first.
    async fn list_operations_by_type_and_instance_id(
        &self,
        instance_id: &str,
        operation_type: OperationType,
    ) -> Result<Vec<OperationRow>, StorageError>;

    /// All operations of one type, newest-first.
    async fn list_operations_by_type(
        &self,
        operation_type: OperationType,
    ) -> Result<Vec<OperationRow>, StorageError>;

    /// Operations created or updated within `[from, to]`.
    async fn list_operations_in_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OperationRow>, StorageError>;

    /// Newest operation of the instance that is not pending. An empty
    /// `types` slice matches every type.
    async fn get_last_operation(
        &self,
        instance_id: &str,
        types: &[OperationType],
    ) -> Result<Option<OperationRow>, StorageError>;

    /// Operations of a type in the given state.
    async fn list_operations_by_type_and_state(
        &self,
        operation_type: OperationType,
        state: OperationState,
    ) -> Result<Vec<OperationRow>, StorageError>;

    /// One page of operations plus the total number matching the filter.
    async fn list_operations(
        &self,
        filter: &OperationFilter,
    ) -> Result<(Vec<OperationRow>, i64), StorageError>;

    /// Operation counts grouped by type, state and plan.
    async fn operation_stats(
        &self,
        state: Option<OperationState>,
    ) -> Result<Vec<OperationStatsRow>, StorageError>;

    /// Version-checked update. Returns the number of rows affected (0 or 1).
    async fn update_operation(&self, row: &OperationRow) -> Result<u64, StorageError>;

    /// Remove an operation. Removing a missing id is not an error.
    async fn delete_operation(&self, id: &str) -> Result<(), StorageError>;

    // ========================================================================
    // Instances
    // ========================================================================

    async fn insert_instance(&self, row: &InstanceRow) -> Result<(), StorageError>;

    async fn get_instance_by_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceRow>, StorageError>;

    async fn find_instances_for_subaccounts(
        &self,
        subaccount_ids: &[String],
    ) -> Result<Vec<InstanceRow>, StorageError>;

    async fn find_instances_for_runtimes(
        &self,
        runtime_ids: &[String],
    ) -> Result<Vec<InstanceRow>, StorageError>;

    /// Distinct non-empty subaccount ids of live instances, sorted.
    async fn list_distinct_subaccounts(&self) -> Result<Vec<String>, StorageError>;

    async fn count_instances_for_global_account(
        &self,
        global_account_id: &str,
    ) -> Result<i64, StorageError>;

    /// One page of live instances, oldest first, plus the total matching.
    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<(Vec<InstanceRow>, i64), StorageError>;

    /// Live instance counts grouped by global account and subaccount.
    async fn active_instance_counts(&self) -> Result<Vec<InstanceCountRow>, StorageError>;

    /// Live instance counts grouped by the license type in the parameters.
    async fn license_type_counts(&self) -> Result<Vec<LicenseTypeCountRow>, StorageError>;

    /// Ids of soft-deleted instances, oldest deletion first.
    async fn list_deleted_instance_ids(&self, limit: i64) -> Result<Vec<String>, StorageError>;

    /// Version-checked update. Returns the number of rows affected (0 or 1).
    async fn update_instance(&self, row: &InstanceRow) -> Result<u64, StorageError>;

    /// Remove an instance. Removing a missing id is not an error.
    async fn delete_instance(&self, instance_id: &str) -> Result<(), StorageError>;

    // ========================================================================
    // Bindings
    // ========================================================================

    /// Insert a binding. Fails with `AlreadyExists` if the instance already
    /// has a binding with that id.
    async fn insert_binding(&self, row: &BindingRow) -> Result<(), StorageError>;

    async fn get_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> Result<Option<BindingRow>, StorageError>;

    /// Overwrite a binding. Returns the number of rows affected (0 or 1).
    async fn update_binding(&self, row: &BindingRow) -> Result<u64, StorageError>;

    /// Remove a binding. Removing a missing one is not an error.
    async fn delete_binding(&self, instance_id: &str, binding_id: &str)
    -> Result<(), StorageError>;

    /// Bindings of an instance, oldest first.
    async fn list_bindings(&self, instance_id: &str) -> Result<Vec<BindingRow>, StorageError>;

    /// Bindings with `expires_at` before `now`, earliest expiration first.
    async fn list_expired_bindings(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BindingRow>, StorageError>;

    // ========================================================================
    // Health
    // ========================================================================

    async fn health_check(&self) -> Result<bool, StorageError>;
}

/// Map a sqlx error, naming the backend call that failed.
pub(crate) fn query_error(operation: &'static str) -> impl Fn(sqlx::Error) -> StorageError {
    move |err| match StorageError::from(err) {
        StorageError::Database { details, .. } => StorageError::Database {
            operation: operation.to_string(),
            details,
        },
        other => other,
    }
}

/// Map a sqlx error raised by an insert; unique violations name the record.
pub(crate) fn insert_error(entity: &'static str, id: &str) -> impl Fn(sqlx::Error) -> StorageError {
    let id = id.to_string();
    move |err| match query_error("insert")(err) {
        StorageError::AlreadyExists { .. } => StorageError::already_exists(entity, id.clone()),
        other => other,
    }
}
