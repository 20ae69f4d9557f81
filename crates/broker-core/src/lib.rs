// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broker Core - operation lifecycle storage
//!
//! Durable, versioned records of the long-running operations a service
//! broker performs on behalf of tenants (provision, deprovision, cluster
//! upgrade, update), and of the instances they act on.
//!
//! # Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ store: Operation/Instance/BindingStore       │  typed views, not-found
//! │                                              │  vs conflict, encryption
//! ├──────────────────────────────────────────────┤
//! │ retry: Retrier                               │  bounded retry of
//! │                                              │  transient failures
//! ├──────────────────────────────────────────────┤
//! │ persistence: StorageBackend                  │  raw rows, version check
//! │   MemoryBackend | SqliteBackend | Postgres   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Optimistic versioning
//!
//! Every operation carries a `version`. An update only applies when the
//! caller's version equals the stored one, and then bumps it by exactly one.
//! A stale update fails with [`StorageError::Conflict`]; callers reload and
//! reapply.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use broker_core::{AesCipher, BrokerStorage, model::{Operation, DeprovisioningData}};
//!
//! let storage = BrokerStorage::in_memory(Arc::new(AesCipher::new("secret")?));
//! let op = Operation::new("op-1", "inst-1", DeprovisioningData::default());
//! storage.operations().insert_deprovisioning_operation(&op).await?;
//! ```

/// Encryption of sensitive provisioning parameters.
pub mod cipher;

/// Storage configuration loaded from environment variables.
pub mod config;

/// Storage error taxonomy.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Operations, instances, bindings and their payloads.
pub mod model;

/// Backend adapter trait and its implementations.
pub mod persistence;

/// Bounded retry with an injectable clock.
pub mod retry;

/// Stores layered over a backend.
pub mod store;

pub use cipher::{AesCipher, Cipher, Decrypted};
pub use error::{Result, StorageError};
pub use persistence::{MemoryBackend, PostgresBackend, SqliteBackend, StorageBackend};
pub use retry::{Backoff, Clock, ManualClock, Retrier, RetryPolicy, SystemClock};
pub use store::{BindingStore, BrokerStorage, InstanceStore, OperationStore};
