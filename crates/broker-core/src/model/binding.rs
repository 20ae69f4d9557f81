// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Duration, Utc};

/// Credentials issued for one instance. The kubeconfig is encrypted at rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub id: String,
    pub instance_id: String,
    pub kubeconfig: String,
    pub expiration_seconds: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Binding {
    /// A binding created now, expiring after `expiration_seconds`.
    pub fn new(
        id: impl Into<String>,
        instance_id: impl Into<String>,
        kubeconfig: impl Into<String>,
        expiration_seconds: i64,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: id.into(),
            instance_id: instance_id.into(),
            kubeconfig: kubeconfig.into(),
            expiration_seconds,
            created_by: String::new(),
            created_at,
            expires_at: created_at + Duration::seconds(expiration_seconds),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Identity of an expired binding; the kubeconfig is never loaded for these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredBinding {
    pub id: String,
    pub instance_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BindingStats {
    /// Age of the oldest expiration still stored, `None` when nothing has
    /// expired.
    pub minutes_since_earliest_expiration: Option<f64>,
}
