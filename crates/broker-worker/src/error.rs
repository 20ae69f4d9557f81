// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for broker-worker.

use broker_core::StorageError;
use broker_core::model::ErrorComponent;
use thiserror::Error;

/// Error reported by a step alongside its backoff.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StepError {
    /// An external system the step depends on failed. Retrying may help.
    #[error("dependency failure: {0}")]
    Dependency(String),

    /// Stored data could not be (de)serialized. Never retried.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Broker storage failed.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// The step decided the operation cannot succeed.
    #[error("{0}")]
    Failed(String),
}

impl StepError {
    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Whether the operation must fail regardless of the requested backoff.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Encoding(_))
    }

    /// Which side is to blame, as recorded in the operation's last error.
    pub fn component(&self) -> ErrorComponent {
        match self {
            Self::Dependency(_) => ErrorComponent::Dependency,
            Self::Storage(e) if e.is_transient() => ErrorComponent::Dependency,
            _ => ErrorComponent::Broker,
        }
    }
}

impl From<StorageError> for StepError {
    fn from(err: StorageError) -> Self {
        if err.is_encoding() {
            Self::Encoding(err.to_string())
        } else {
            Self::Storage(err)
        }
    }
}

/// Failure to process an operation from the work queue.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProcessError {
    /// Loading or saving the operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type using [`ProcessError`].
pub type Result<T> = std::result::Result<T, ProcessError>;
