// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance bindings with encrypted kubeconfigs.

use std::sync::Arc;

use chrono::Utc;

use crate::error::StorageError;
use crate::model::{Binding, BindingStats, ExpiredBinding};
use crate::persistence::StorageBackend;
use crate::retry::Retrier;

use super::codec::Codec;

const ENTITY: &str = "binding";

#[derive(Clone)]
pub struct BindingStore {
    backend: Arc<dyn StorageBackend>,
    codec: Codec,
    retrier: Retrier,
}

impl std::fmt::Debug for BindingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingStore")
            .field("retrier", &self.retrier)
            .finish_non_exhaustive()
    }
}

impl BindingStore {
    pub(crate) fn new(backend: Arc<dyn StorageBackend>, codec: Codec, retrier: Retrier) -> Self {
        Self {
            backend,
            codec,
            retrier,
        }
    }

    /// Fails with `AlreadyExists` when the instance already has this binding id.
    pub async fn insert(&self, binding: &Binding) -> Result<(), StorageError> {
        let row = self.codec.encode_binding(binding)?;
        self.retrier
            .run("insert_binding", || self.backend.insert_binding(&row))
            .await
    }

    pub async fn get(&self, instance_id: &str, binding_id: &str) -> Result<Binding, StorageError> {
        let row = self
            .retrier
            .run("get_binding", || {
                self.backend.get_binding(instance_id, binding_id)
            })
            .await?
            .ok_or_else(|| StorageError::not_found(ENTITY, binding_id))?;
        self.codec.decode_binding(row)
    }

    /// Overwrite the kubeconfig, creator and expiry. `created_at` is kept.
    pub async fn update(&self, binding: &Binding) -> Result<(), StorageError> {
        let row = self.codec.encode_binding(binding)?;
        let affected = self
            .retrier
            .run("update_binding", || self.backend.update_binding(&row))
            .await?;
        if affected == 0 {
            return Err(StorageError::not_found(ENTITY, &binding.id));
        }
        Ok(())
    }

    /// Deleting a missing binding succeeds.
    pub async fn delete(&self, instance_id: &str, binding_id: &str) -> Result<(), StorageError> {
        self.retrier
            .run("delete_binding", || {
                self.backend.delete_binding(instance_id, binding_id)
            })
            .await
    }

    /// Bindings of one instance, oldest first.
    pub async fn list_by_instance_id(&self, instance_id: &str) -> Result<Vec<Binding>, StorageError> {
        let rows = self
            .retrier
            .run("list_bindings", || self.backend.list_bindings(instance_id))
            .await?;
        rows.into_iter()
            .map(|row| self.codec.decode_binding(row))
            .collect()
    }

    /// Bindings whose expiry has passed, earliest expiry first.
    pub async fn list_expired(&self) -> Result<Vec<ExpiredBinding>, StorageError> {
        let now = Utc::now();
        let rows = self
            .retrier
            .run("list_expired_bindings", || {
                self.backend.list_expired_bindings(now)
            })
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| ExpiredBinding {
                id: row.id,
                instance_id: row.instance_id,
                expires_at: row.expires_at,
            })
            .collect())
    }

    pub async fn get_statistics(&self) -> Result<BindingStats, StorageError> {
        let now = Utc::now();
        let expired = self.list_expired().await?;
        let minutes_since_earliest_expiration = expired
            .iter()
            .map(|b| b.expires_at)
            .min()
            .map(|earliest| (now - earliest).num_milliseconds() as f64 / 60_000.0);
        Ok(BindingStats {
            minutes_since_earliest_expiration,
        })
    }
}
