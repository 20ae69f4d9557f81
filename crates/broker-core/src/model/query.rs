// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Query inputs and projections returned by the stores.

use std::collections::HashMap;

use super::instance::Instance;
use super::operation::{Operation, OperationState, OperationType};
use super::payload::{
    DeprovisioningOperation, ProvisioningOperation, UpdatingOperation, UpgradeClusterOperation,
};

/// Operations of one instance partitioned by type.
///
/// Provision and deprovision lists are newest-first, upgrade and update
/// lists oldest-first.
#[derive(Debug, Clone, Default)]
pub struct GroupedOperations {
    pub provision_operations: Vec<ProvisioningOperation>,
    pub deprovision_operations: Vec<DeprovisioningOperation>,
    pub upgrade_cluster_operations: Vec<UpgradeClusterOperation>,
    pub update_operations: Vec<UpdatingOperation>,
}

/// Per-plan state counts for provisioning and deprovisioning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationStats {
    pub provisioning: HashMap<OperationState, i64>,
    pub deprovisioning: HashMap<OperationState, i64>,
}

/// One aggregated `(plan, type, state)` count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatsV2 {
    pub plan_id: String,
    pub operation_type: OperationType,
    pub state: OperationState,
    pub count: i64,
}

/// Paging and state filter for [`list_operations`](crate::store::OperationStore::list_operations).
#[derive(Debug, Clone)]
pub struct OperationFilter {
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
    /// Empty means all states.
    pub states: Vec<OperationState>,
}

impl Default for OperationFilter {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 100,
            states: Vec::new(),
        }
    }
}

impl OperationFilter {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * i64::from(self.page_size)
    }
}

#[derive(Debug, Clone)]
pub struct OperationPage {
    pub operations: Vec<Operation>,
    pub count: usize,
    pub total_count: i64,
}

/// Filter and paging for [`list`](crate::store::InstanceStore::list).
///
/// Empty lists match everything; non-empty lists match any of their values.
/// Soft-deleted instances are never listed.
#[derive(Debug, Clone)]
pub struct InstanceFilter {
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
    pub instance_ids: Vec<String>,
    pub global_account_ids: Vec<String>,
    pub subaccount_ids: Vec<String>,
    pub runtime_ids: Vec<String>,
    pub regions: Vec<String>,
    pub plan_ids: Vec<String>,
    pub plan_names: Vec<String>,
    /// `Some(true)` keeps only expired instances, `Some(false)` only live ones.
    pub expired: Option<bool>,
}

impl Default for InstanceFilter {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 100,
            instance_ids: Vec::new(),
            global_account_ids: Vec::new(),
            subaccount_ids: Vec::new(),
            runtime_ids: Vec::new(),
            regions: Vec::new(),
            plan_ids: Vec::new(),
            plan_names: Vec::new(),
            expired: None,
        }
    }
}

impl InstanceFilter {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * i64::from(self.page_size)
    }
}

#[derive(Debug, Clone)]
pub struct InstancePage {
    pub instances: Vec<Instance>,
    pub count: usize,
    pub total_count: i64,
}

/// Counts of instances that are not soft-deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceStats {
    pub total_number_of_instances: i64,
    pub per_global_account_id: HashMap<String, i64>,
    pub per_subaccount_id: HashMap<String, i64>,
}

/// Instance counts per license type. Instances without one count under `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErsContextStats {
    pub license_type: HashMap<String, i64>,
}
