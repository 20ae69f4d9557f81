// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kind-specific operation payloads.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::operation::{Operation, OperationType};

/// Anything that can sit in [`Operation::payload`].
pub trait Payload: Clone + Send + Sync + 'static {
    fn operation_type(&self) -> OperationType;

    /// Serialize the kind-specific fields (without the type tag).
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;
}

/// A payload that has a typed operation view.
pub trait OperationKind: Payload + Debug + Serialize + DeserializeOwned {
    const TYPE: OperationType;

    fn from_payload(payload: OperationPayload) -> Option<Self>;

    fn into_payload(self) -> OperationPayload;
}

/// Tagged union of every payload shape, keyed by [`OperationType`].
#[derive(Debug, Clone, PartialEq)]
pub enum OperationPayload {
    Provision(ProvisioningData),
    Deprovision(DeprovisioningData),
    UpgradeCluster(UpgradeClusterData),
    Update(UpdatingData),
    /// Kept as raw JSON; there is no typed view for it.
    UpgradeKyma(serde_json::Value),
}

impl OperationPayload {
    /// Decode the stored payload for the given tag.
    pub fn decode(
        operation_type: OperationType,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match operation_type {
            OperationType::Provision => Self::Provision(serde_json::from_value(value)?),
            OperationType::Deprovision => Self::Deprovision(serde_json::from_value(value)?),
            OperationType::UpgradeCluster => Self::UpgradeCluster(serde_json::from_value(value)?),
            OperationType::Update => Self::Update(serde_json::from_value(value)?),
            OperationType::UpgradeKyma => Self::UpgradeKyma(value),
        })
    }
}

impl Payload for OperationPayload {
    fn operation_type(&self) -> OperationType {
        match self {
            Self::Provision(_) => OperationType::Provision,
            Self::Deprovision(_) => OperationType::Deprovision,
            Self::UpgradeCluster(_) => OperationType::UpgradeCluster,
            Self::Update(_) => OperationType::Update,
            Self::UpgradeKyma(_) => OperationType::UpgradeKyma,
        }
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Provision(data) => serde_json::to_value(data),
            Self::Deprovision(data) => serde_json::to_value(data),
            Self::UpgradeCluster(data) => serde_json::to_value(data),
            Self::Update(data) => serde_json::to_value(data),
            Self::UpgradeKyma(value) => Ok(value.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningData {
    #[serde(default)]
    pub runtime_version: Option<String>,
    #[serde(default)]
    pub dashboard_url: String,
    #[serde(default)]
    pub provisioner_operation_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprovisioningData {
    /// Suspension: the runtime goes away, the instance stays.
    #[serde(default)]
    pub temporary: bool,
    /// Set when an earlier run stopped part-way; remaining steps must replay.
    #[serde(default)]
    pub executed_but_not_completed: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeClusterData {
    #[serde(default)]
    pub orchestration_id: String,
    #[serde(default)]
    pub maintenance_window_begin: Option<DateTime<Utc>>,
    #[serde(default)]
    pub maintenance_window_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatingData {
    #[serde(default)]
    pub update_parameters: serde_json::Value,
    #[serde(default)]
    pub updated_plan_id: Option<String>,
    #[serde(default)]
    pub requires_reconcile_update: bool,
}

macro_rules! operation_kind {
    ($data:ty, $variant:ident) => {
        impl Payload for $data {
            fn operation_type(&self) -> OperationType {
                OperationType::$variant
            }

            fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
                serde_json::to_value(self)
            }
        }

        impl OperationKind for $data {
            const TYPE: OperationType = OperationType::$variant;

            fn from_payload(payload: OperationPayload) -> Option<Self> {
                match payload {
                    OperationPayload::$variant(data) => Some(data),
                    _ => None,
                }
            }

            fn into_payload(self) -> OperationPayload {
                OperationPayload::$variant(self)
            }
        }
    };
}

operation_kind!(ProvisioningData, Provision);
operation_kind!(DeprovisioningData, Deprovision);
operation_kind!(UpgradeClusterData, UpgradeCluster);
operation_kind!(UpdatingData, Update);

pub type ProvisioningOperation = Operation<ProvisioningData>;
pub type DeprovisioningOperation = Operation<DeprovisioningData>;
pub type UpgradeClusterOperation = Operation<UpgradeClusterData>;
pub type UpdatingOperation = Operation<UpdatingData>;
