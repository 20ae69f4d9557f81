// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operation, instance and binding stores over a [`StorageBackend`].

mod bindings;
mod codec;
mod instances;
mod operations;

pub use self::bindings::BindingStore;
pub use self::instances::InstanceStore;
pub use self::operations::OperationStore;

use std::sync::Arc;

use crate::cipher::Cipher;
use crate::persistence::{MemoryBackend, StorageBackend};
use crate::retry::Retrier;

use self::codec::Codec;

/// Entry point to broker storage: one backend, one cipher, one retry policy
/// shared by every store.
#[derive(Debug, Clone)]
pub struct BrokerStorage {
    operations: OperationStore,
    instances: InstanceStore,
    bindings: BindingStore,
}

impl BrokerStorage {
    pub fn new(backend: Arc<dyn StorageBackend>, cipher: Arc<dyn Cipher>, retrier: Retrier) -> Self {
        let codec = Codec::new(cipher);
        let operations = OperationStore::new(backend.clone(), codec.clone(), retrier.clone());
        let bindings = BindingStore::new(backend.clone(), codec.clone(), retrier.clone());
        let instances = InstanceStore::new(backend, codec, retrier, operations.clone());
        Self {
            operations,
            instances,
            bindings,
        }
    }

    /// Storage backed by [`MemoryBackend`], for tests and local runs.
    pub fn in_memory(cipher: Arc<dyn Cipher>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), cipher, Retrier::default())
    }

    pub fn operations(&self) -> &OperationStore {
        &self.operations
    }

    pub fn instances(&self) -> &InstanceStore {
        &self.instances
    }

    pub fn bindings(&self) -> &BindingStore {
        &self.bindings
    }
}
