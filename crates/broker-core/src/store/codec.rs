// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conversion between model values and stored rows.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cipher::{Cipher, decrypt_parameters, encrypt_parameters};
use crate::error::StorageError;
use crate::model::{
    Binding, Instance, InstanceDetails, LastError, Operation, OperationPayload, OperationType, Payload,
    ProvisioningParameters,
};
use crate::persistence::{BindingRow, InstanceRow, OperationRow};

const STAGE_SEPARATOR: &str = ",";

/// Layout of the `data` column.
#[derive(Serialize, Deserialize)]
struct StoredData {
    #[serde(default)]
    instance_details: InstanceDetails,
    #[serde(default)]
    last_error: Option<LastError>,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Clone)]
pub(crate) struct Codec {
    cipher: Arc<dyn Cipher>,
}

impl Codec {
    pub(crate) fn new(cipher: Arc<dyn Cipher>) -> Self {
        Self { cipher }
    }

    pub(crate) fn encode_operation<P: Payload>(
        &self,
        operation: &Operation<P>,
    ) -> Result<OperationRow, StorageError> {
        let data = StoredData {
            instance_details: operation.instance_details.clone(),
            last_error: operation.last_error.clone(),
            payload: operation.payload.to_json()?,
        };
        let finished_stages = if operation.finished_stages.is_empty() {
            None
        } else {
            Some(operation.finished_stages.join(STAGE_SEPARATOR))
        };

        Ok(OperationRow {
            id: operation.id.clone(),
            instance_id: operation.instance_id.clone(),
            operation_type: operation.operation_type().as_str().to_string(),
            state: operation.state.as_str().to_string(),
            description: operation.description.clone(),
            created_at: operation.created_at,
            updated_at: operation.updated_at,
            version: operation.version,
            data: serde_json::to_string(&data)?,
            provisioning_parameters: Some(
                self.encode_parameters(&operation.provisioning_parameters)?,
            ),
            finished_stages,
        })
    }

    pub(crate) fn decode_operation(&self, row: OperationRow) -> Result<Operation, StorageError> {
        let operation_type: OperationType = row.operation_type.parse()?;
        let data: StoredData = serde_json::from_str(&row.data)?;
        let payload = OperationPayload::decode(operation_type, data.payload).map_err(|e| {
            StorageError::Encoding(format!(
                "operation '{}' has an invalid {} payload: {}",
                row.id, operation_type, e
            ))
        })?;

        let provisioning_parameters = match row.provisioning_parameters.as_deref() {
            Some(raw) if !raw.is_empty() => self.decode_parameters(raw, "operation", &row.id)?,
            _ => ProvisioningParameters::default(),
        };
        let finished_stages = row
            .finished_stages
            .as_deref()
            .unwrap_or_default()
            .split(STAGE_SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Operation {
            id: row.id,
            instance_id: row.instance_id,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            state: row.state.parse()?,
            description: row.description,
            provisioning_parameters,
            instance_details: data.instance_details,
            finished_stages,
            last_error: data.last_error,
            payload,
        })
    }

    pub(crate) fn encode_instance(&self, instance: &Instance) -> Result<InstanceRow, StorageError> {
        Ok(InstanceRow {
            instance_id: instance.instance_id.clone(),
            runtime_id: instance.runtime_id.clone(),
            global_account_id: instance.global_account_id.clone(),
            subaccount_id: instance.subaccount_id.clone(),
            service_plan_id: instance.service_plan_id.clone(),
            service_plan_name: instance.service_plan_name.clone(),
            provider_region: instance.provider_region.clone(),
            provisioning_parameters: self.encode_parameters(&instance.parameters)?,
            created_at: instance.created_at,
            updated_at: instance.updated_at,
            deleted_at: instance.deleted_at,
            expired_at: instance.expired_at,
            version: instance.version,
        })
    }

    pub(crate) fn decode_instance(&self, row: InstanceRow) -> Result<Instance, StorageError> {
        let parameters = if row.provisioning_parameters.is_empty() {
            ProvisioningParameters::default()
        } else {
            self.decode_parameters(&row.provisioning_parameters, "instance", &row.instance_id)?
        };

        Ok(Instance {
            instance_id: row.instance_id,
            runtime_id: row.runtime_id,
            global_account_id: row.global_account_id,
            subaccount_id: row.subaccount_id,
            service_plan_id: row.service_plan_id,
            service_plan_name: row.service_plan_name,
            provider_region: row.provider_region,
            parameters,
            instance_details: InstanceDetails::default(),
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
            expired_at: row.expired_at,
            version: row.version,
        })
    }

    pub(crate) fn encode_binding(&self, binding: &Binding) -> Result<BindingRow, StorageError> {
        Ok(BindingRow {
            id: binding.id.clone(),
            instance_id: binding.instance_id.clone(),
            kubeconfig: self.cipher.encrypt(&binding.kubeconfig)?,
            expiration_seconds: binding.expiration_seconds,
            created_by: binding.created_by.clone(),
            created_at: binding.created_at,
            expires_at: binding.expires_at,
        })
    }

    /// Unlike parameters, binding kubeconfigs were always encrypted, so a
    /// value that does not decrypt is an error.
    pub(crate) fn decode_binding(&self, row: BindingRow) -> Result<Binding, StorageError> {
        let kubeconfig = self.cipher.decrypt(&row.kubeconfig).map_err(|e| {
            StorageError::Encryption(format!(
                "binding '{}' of instance '{}': {}",
                row.id, row.instance_id, e
            ))
        })?;

        Ok(Binding {
            id: row.id,
            instance_id: row.instance_id,
            kubeconfig,
            expiration_seconds: row.expiration_seconds,
            created_by: row.created_by,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }

    fn encode_parameters(&self, parameters: &ProvisioningParameters) -> Result<String, StorageError> {
        let mut sealed = parameters.clone();
        encrypt_parameters(self.cipher.as_ref(), &mut sealed)?;
        Ok(serde_json::to_string(&sealed)?)
    }

    fn decode_parameters(
        &self,
        raw: &str,
        entity: &'static str,
        id: &str,
    ) -> Result<ProvisioningParameters, StorageError> {
        let mut parameters: ProvisioningParameters = serde_json::from_str(raw)?;
        let degraded = decrypt_parameters(self.cipher.as_ref(), &mut parameters);
        if !degraded.is_empty() {
            warn!(
                entity,
                id,
                fields = ?degraded,
                "Decrypting skipped because fields are stored in plain text"
            );
        }
        Ok(parameters)
    }
}
