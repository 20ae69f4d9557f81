// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The generic operation core.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::parameters::ProvisioningParameters;
use super::payload::{OperationKind, OperationPayload, Payload};
use crate::error::StorageError;

/// Kind of long-running work an operation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    #[serde(rename = "provision")]
    Provision,
    #[serde(rename = "deprovision")]
    Deprovision,
    #[serde(rename = "upgradeCluster")]
    UpgradeCluster,
    #[serde(rename = "update")]
    Update,
    /// Legacy runtime upgrade. Still readable, never produced and skipped
    /// when grouping operations by type.
    #[serde(rename = "upgradeKyma")]
    UpgradeKyma,
}

impl OperationType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Deprovision => "deprovision",
            Self::UpgradeCluster => "upgradeCluster",
            Self::Update => "update",
            Self::UpgradeKyma => "upgradeKyma",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provision" => Ok(Self::Provision),
            "deprovision" => Ok(Self::Deprovision),
            "upgradeCluster" => Ok(Self::UpgradeCluster),
            "update" => Ok(Self::Update),
            "upgradeKyma" => Ok(Self::UpgradeKyma),
            other => Err(StorageError::Encoding(format!(
                "unknown operation type '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "retrying")]
    Retrying,
    #[serde(rename = "canceling")]
    Canceling,
    #[serde(rename = "canceled")]
    Canceled,
}

impl OperationState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
        }
    }

    /// Terminal states are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in progress" => Ok(Self::InProgress),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            "canceling" => Ok(Self::Canceling),
            "canceled" => Ok(Self::Canceled),
            other => Err(StorageError::Encoding(format!(
                "unknown operation state '{}'",
                other
            ))),
        }
    }
}

/// Runtime facts gathered while an operation runs. Copied onto the
/// instance when it is read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDetails {
    #[serde(default)]
    pub runtime_id: String,
    #[serde(default)]
    pub shoot_name: String,
    #[serde(default)]
    pub shoot_domain: String,
    #[serde(default)]
    pub subaccount_id: String,
}

/// Who caused the most recent step error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorComponent {
    Broker,
    Dependency,
}

/// Error context kept on the operation for later inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub component: ErrorComponent,
    pub step: String,
    pub message: String,
}

/// A durable record of one long-running unit of work.
///
/// `P` is the payload: [`OperationPayload`] for the generic form, or one of
/// the kind types for a typed view.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation<P = OperationPayload> {
    pub id: String,
    pub instance_id: String,
    /// Optimistic concurrency token. Bumped by exactly one per stored update.
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: OperationState,
    pub description: String,
    pub provisioning_parameters: ProvisioningParameters,
    pub instance_details: InstanceDetails,
    /// Names of completed steps, in completion order. Append only.
    pub finished_stages: Vec<String>,
    pub last_error: Option<LastError>,
    pub payload: P,
}

impl<K: OperationKind> Operation<K> {
    /// Create a pending operation of kind `K`.
    pub fn new(id: impl Into<String>, instance_id: impl Into<String>, payload: K) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            instance_id: instance_id.into(),
            version: 0,
            created_at: now,
            updated_at: now,
            state: OperationState::Pending,
            description: String::new(),
            provisioning_parameters: ProvisioningParameters::default(),
            instance_details: InstanceDetails::default(),
            finished_stages: Vec::new(),
            last_error: None,
            payload,
        }
    }

    pub fn with_parameters(mut self, parameters: ProvisioningParameters) -> Self {
        self.provisioning_parameters = parameters;
        self
    }

    /// Erase the kind, keeping the payload as the tagged union.
    pub fn into_generic(self) -> Operation {
        self.map_payload(K::into_payload)
    }
}

impl Operation {
    /// Narrow a generic operation to the typed view `K`.
    ///
    /// Fails closed with an encoding error when the payload tag differs.
    pub fn try_into_kind<K: OperationKind>(self) -> Result<Operation<K>, StorageError> {
        let actual = self.payload.operation_type();
        if actual != K::TYPE {
            return Err(StorageError::Encoding(format!(
                "expected operation type {}, but was {}",
                K::TYPE,
                actual
            )));
        }
        let Operation {
            id,
            instance_id,
            version,
            created_at,
            updated_at,
            state,
            description,
            provisioning_parameters,
            instance_details,
            finished_stages,
            last_error,
            payload,
        } = self;
        let payload = K::from_payload(payload).ok_or_else(|| {
            StorageError::Encoding(format!("payload does not match type {}", K::TYPE))
        })?;
        Ok(Operation {
            id,
            instance_id,
            version,
            created_at,
            updated_at,
            state,
            description,
            provisioning_parameters,
            instance_details,
            finished_stages,
            last_error,
            payload,
        })
    }
}

impl<P: Payload> Operation<P> {
    pub fn operation_type(&self) -> OperationType {
        self.payload.operation_type()
    }

    pub fn is_stage_finished(&self, stage: &str) -> bool {
        self.finished_stages.iter().any(|s| s == stage)
    }

    /// Record `stage` as finished. Applying it twice has no further effect.
    pub fn mark_stage_finished(&mut self, stage: &str) {
        if !self.is_stage_finished(stage) {
            self.finished_stages.push(stage.to_string());
        }
    }

    fn map_payload<Q>(self, f: impl FnOnce(P) -> Q) -> Operation<Q> {
        Operation {
            id: self.id,
            instance_id: self.instance_id,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            state: self.state,
            description: self.description,
            provisioning_parameters: self.provisioning_parameters,
            instance_details: self.instance_details,
            finished_stages: self.finished_stages,
            last_error: self.last_error,
            payload: f(self.payload),
        }
    }
}
