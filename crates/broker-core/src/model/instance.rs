// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};

use super::operation::InstanceDetails;
use super::parameters::ProvisioningParameters;

/// A provisioned, tenant-owned resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub instance_id: String,
    /// Empty once the runtime is torn down.
    pub runtime_id: String,
    pub global_account_id: String,
    pub subaccount_id: String,
    pub service_plan_id: String,
    pub service_plan_name: String,
    pub provider_region: String,
    pub parameters: ProvisioningParameters,
    /// Filled from the latest operation on read; not stored with the instance.
    pub instance_details: InstanceDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-deletion marker.
    pub deleted_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub version: i32,
}

impl Instance {
    pub fn new(instance_id: impl Into<String>, parameters: ProvisioningParameters) -> Self {
        let now = Utc::now();
        Self {
            instance_id: instance_id.into(),
            runtime_id: String::new(),
            global_account_id: parameters.ers_context.global_account_id.clone(),
            subaccount_id: parameters.ers_context.subaccount_id.clone(),
            service_plan_id: parameters.plan_id.clone(),
            service_plan_name: String::new(),
            provider_region: parameters.platform_region.clone(),
            parameters,
            instance_details: InstanceDetails::default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            expired_at: None,
            version: 0,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
