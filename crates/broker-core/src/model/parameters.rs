// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning parameters shared by operations and instances.
//!
//! Three fields are sensitive and encrypted at rest by the stores: the
//! service manager client id and secret, and the kubeconfig.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningParameters {
    #[serde(default)]
    pub plan_id: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub platform_region: String,
    #[serde(default)]
    pub ers_context: ErsContext,
    #[serde(default)]
    pub parameters: RuntimeParameters,
}

/// Tenant context handed over by the account service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErsContext {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub subaccount_id: String,
    #[serde(default)]
    pub global_account_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_type: Option<String>,
    #[serde(default)]
    pub sm_operator_credentials: Option<SmCredentials>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmCredentials {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub sm_url: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeParameters {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub kubeconfig: String,
    #[serde(default)]
    pub shoot_name: Option<String>,
}
