// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Access to labelled resources in the external resource API.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Plural name of the labelled resource kind.
pub const RESOURCE_PLURAL: &str = "kymas";

/// A resource as returned by the API. Everything besides the metadata is
/// carried through untouched so updates write back the full object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub metadata: ResourceMetadata,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl Resource {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ResourceMetadata {
                name: name.into(),
                namespace: namespace.into(),
                ..Default::default()
            },
            rest: serde_json::Map::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(default)]
    items: Vec<Resource>,
}

/// Errors from the resource API.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResourceError {
    /// The call did not finish in time.
    #[error("resource API call timed out after {0:?}")]
    Timeout(Duration),

    /// The API answered with a non-success status.
    #[error("resource API returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The request could not be sent or the response not read.
    #[error("resource API request failed: {0}")]
    Transport(String),

    /// A failure injected by a test double.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for ResourceError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Lists and updates labelled resources.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Resources in `namespace` whose label `key` equals `value` exactly.
    async fn list_by_label(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<Resource>, ResourceError>;

    /// Replace the stored resource with `resource`.
    async fn update_labels(&self, resource: &Resource) -> Result<(), ResourceError>;
}

/// [`ResourceClient`] over a Kubernetes-style REST API.
///
/// Resources live at `{base_url}/namespaces/{namespace}/kymas/{name}`; lists
/// take a `labelSelector` query and updates `PUT` the full object.
#[derive(Debug, Clone)]
pub struct HttpResourceClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpResourceClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ResourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn collection_url(&self, namespace: &str) -> String {
        format!(
            "{}/namespaces/{}/{}",
            self.base_url, namespace, RESOURCE_PLURAL
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ResourceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ResourceError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    async fn list_by_label(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<Resource>, ResourceError> {
        let selector = format!("{key}={value}");
        let url = self.collection_url(namespace);
        debug!(url = %url, selector = %selector, "Listing labelled resources");

        let response = self
            .authorize(self.client.get(&url))
            .query(&[("labelSelector", selector.as_str())])
            .send()
            .await?;
        let list: ResourceList = Self::check(response).await?.json().await?;
        Ok(list.items)
    }

    async fn update_labels(&self, resource: &Resource) -> Result<(), ResourceError> {
        let url = format!(
            "{}/{}",
            self.collection_url(&resource.metadata.namespace),
            resource.metadata.name
        );
        debug!(url = %url, "Updating resource");

        let response = self
            .authorize(self.client.put(&url))
            .json(resource)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
