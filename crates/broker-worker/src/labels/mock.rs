// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory [`ResourceClient`] for tests and local runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::client::{Resource, ResourceClient, ResourceError};

#[derive(Default)]
struct State {
    /// `(namespace, name)` -> resource.
    resources: HashMap<(String, String), Resource>,
    fail_list: bool,
    fail_update: HashSet<String>,
    list_calls: usize,
    updates: Vec<Resource>,
    update_delay: Duration,
}

/// Resource client backed by a map, with failure injection.
#[derive(Clone, Default)]
pub struct MockResourceClient {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MockResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockResourceClient").finish_non_exhaustive()
    }
}

impl MockResourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client whose list calls always fail.
    pub fn failing() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                fail_list: true,
                ..Default::default()
            })),
        }
    }

    pub async fn add(&self, resource: Resource) {
        let key = (
            resource.metadata.namespace.clone(),
            resource.metadata.name.clone(),
        );
        self.state.lock().await.resources.insert(key, resource);
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Option<Resource> {
        self.state
            .lock()
            .await
            .resources
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub async fn set_fail_list(&self, fail: bool) {
        self.state.lock().await.fail_list = fail;
    }

    /// Make updates of the named resource fail (or succeed again).
    pub async fn set_fail_update(&self, name: &str, fail: bool) {
        let mut state = self.state.lock().await;
        if fail {
            state.fail_update.insert(name.to_string());
        } else {
            state.fail_update.remove(name);
        }
    }

    /// Hold every update for `delay` before applying it.
    pub async fn set_update_delay(&self, delay: Duration) {
        self.state.lock().await.update_delay = delay;
    }

    pub async fn list_calls(&self) -> usize {
        self.state.lock().await.list_calls
    }

    /// Every successfully applied update, in order.
    pub async fn updates(&self) -> Vec<Resource> {
        self.state.lock().await.updates.clone()
    }
}

#[async_trait]
impl ResourceClient for MockResourceClient {
    async fn list_by_label(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<Resource>, ResourceError> {
        let mut state = self.state.lock().await;
        state.list_calls += 1;
        if state.fail_list {
            return Err(ResourceError::Other("list failed".to_string()));
        }

        let mut matches: Vec<Resource> = state
            .resources
            .values()
            .filter(|r| r.metadata.namespace == namespace && r.label(key) == Some(value))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(matches)
    }

    async fn update_labels(&self, resource: &Resource) -> Result<(), ResourceError> {
        let delay = self.state.lock().await.update_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.fail_update.contains(&resource.metadata.name) {
            return Err(ResourceError::Other(format!(
                "update of {} failed",
                resource.metadata.name
            )));
        }

        let key = (
            resource.metadata.namespace.clone(),
            resource.metadata.name.clone(),
        );
        if !state.resources.contains_key(&key) {
            return Err(ResourceError::Status {
                status: 404,
                body: format!("{} not found", resource.metadata.name),
            });
        }
        state.resources.insert(key, resource.clone());
        state.updates.push(resource.clone());
        Ok(())
    }
}
