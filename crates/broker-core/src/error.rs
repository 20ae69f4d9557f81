// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for broker-core.
//!
//! Every store and backend call returns [`StorageError`]. The variants form
//! the taxonomy callers branch on: a missing record, a duplicate insert, a
//! stale version, an unreachable dependency, or a record that cannot be
//! (de)serialized.

/// Result type using StorageError
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors returned by the storage layer.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The requested record does not exist (or exists with a different type).
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Kind of record looked up.
        entity: &'static str,
        /// Identifier used for the lookup.
        id: String,
    },

    /// An insert hit an existing primary key.
    #[error("{entity} '{id}' already exists")]
    AlreadyExists {
        /// Kind of record inserted.
        entity: &'static str,
        /// The duplicated identifier.
        id: String,
    },

    /// Optimistic lock mismatch: the stored version moved on.
    #[error("{entity} '{id}' was modified concurrently (expected version {expected_version})")]
    Conflict {
        /// Kind of record updated.
        entity: &'static str,
        /// Identifier of the record.
        id: String,
        /// Version the caller submitted.
        expected_version: i32,
    },

    /// The backend failed or was unreachable. Retried by the store.
    #[error("database error during {operation}: {details}")]
    Database {
        /// The backend call that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A record could not be serialized or deserialized.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A sensitive field could not be encrypted.
    #[error("encryption error: {0}")]
    Encryption(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(entity: &'static str, id: impl Into<String>, expected_version: i32) -> Self {
        Self::Conflict {
            entity,
            id: id.into(),
            expected_version,
        }
    }

    pub fn database(operation: impl Into<String>, details: impl ToString) -> Self {
        Self::Database {
            operation: operation.into(),
            details: details.to_string(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::Conflict { .. } => "CONFLICT",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Encoding(_) => "ENCODING_ERROR",
            Self::Encryption(_) => "ENCRYPTION_ERROR",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the store's retry loop should try the call again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database { .. })
    }

    /// Encoding and encryption failures are fatal for the record involved.
    pub fn is_encoding(&self) -> bool {
        matches!(self, Self::Encoding(_) | Self::Encryption(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row",
                id: String::new(),
            },
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::AlreadyExists {
                    entity: "row",
                    id: db_err.constraint().unwrap_or_default().to_string(),
                }
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Encoding(err.to_string())
            }
            _ => Self::Database {
                operation: "query".to_string(),
                details: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}
