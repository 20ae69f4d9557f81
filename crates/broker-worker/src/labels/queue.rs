// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Multi-consumer priority queue of label-sync items.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Desired label state of one subaccount.
///
/// Flags are the literal label values, `"true"` or `"false"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    #[serde(rename = "SubaccountID")]
    pub subaccount_id: String,
    #[serde(rename = "BetaEnabled")]
    pub beta_enabled: String,
    #[serde(rename = "UsedForProduction")]
    pub used_for_production: String,
}

impl QueueItem {
    pub fn new(subaccount_id: impl Into<String>, beta_enabled: bool, used_for_production: bool) -> Self {
        Self {
            subaccount_id: subaccount_id.into(),
            beta_enabled: beta_enabled.to_string(),
            used_for_production: used_for_production.to_string(),
        }
    }
}

/// A queued item with the time its source record was last modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueElement {
    pub item: QueueItem,
    /// Unix milliseconds; orders extraction, oldest first.
    pub modified_at: i64,
}

#[derive(Default)]
struct Inner {
    /// `(modified_at, seq)` -> subaccount id, oldest first.
    order: BTreeMap<(i64, u64), String>,
    elements: HashMap<String, ((i64, u64), QueueElement)>,
    seq: u64,
}

/// Priority queue holding at most one element per subaccount.
///
/// Inserting a subaccount that is already queued keeps whichever element
/// has the newer `modified_at`; on a tie the later insert wins.
#[derive(Default)]
pub struct PriorityQueue {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for PriorityQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue").finish_non_exhaustive()
    }
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, element: QueueElement) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let subaccount_id = element.item.subaccount_id.clone();

        if let Some((key, existing)) = inner.elements.get(&subaccount_id) {
            if existing.modified_at > element.modified_at {
                return;
            }
            inner.order.remove(key);
        }

        inner.seq += 1;
        let key = (element.modified_at, inner.seq);
        inner.order.insert(key, subaccount_id.clone());
        inner.elements.insert(subaccount_id, (key, element));
    }

    /// Remove and return the oldest element, if any.
    pub async fn extract(&self) -> Option<QueueElement> {
        let mut inner = self.inner.lock().await;
        let (_, subaccount_id) = inner.order.pop_first()?;
        inner
            .elements
            .remove(&subaccount_id)
            .map(|(_, element)| element)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.elements.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(subaccount: &str, beta: bool, modified_at: i64) -> QueueElement {
        QueueElement {
            item: QueueItem::new(subaccount, beta, false),
            modified_at,
        }
    }

    #[tokio::test]
    async fn test_extracts_oldest_first() {
        let queue = PriorityQueue::new();
        queue.insert(element("s2", true, 20)).await;
        queue.insert(element("s1", true, 10)).await;
        queue.insert(element("s3", true, 30)).await;

        let order: Vec<_> = [
            queue.extract().await.unwrap(),
            queue.extract().await.unwrap(),
            queue.extract().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.item.subaccount_id)
        .collect();

        assert_eq!(order, vec!["s1", "s2", "s3"]);
        assert!(queue.extract().await.is_none());
    }

    #[tokio::test]
    async fn test_newer_element_replaces_older() {
        let queue = PriorityQueue::new();
        queue.insert(element("s1", false, 10)).await;
        queue.insert(element("s1", true, 20)).await;

        assert_eq!(queue.len().await, 1);
        let extracted = queue.extract().await.unwrap();
        assert_eq!(extracted.item.beta_enabled, "true");
        assert_eq!(extracted.modified_at, 20);
    }

    #[tokio::test]
    async fn test_older_element_is_ignored() {
        let queue = PriorityQueue::new();
        queue.insert(element("s1", true, 20)).await;
        queue.insert(element("s1", false, 10)).await;

        let extracted = queue.extract().await.unwrap();
        assert_eq!(extracted.item.beta_enabled, "true");
        assert!(queue.is_empty().await);
    }

    #[test]
    fn test_item_wire_shape() {
        let item = QueueItem::new("S1", true, false);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "SubaccountID": "S1",
                "BetaEnabled": "true",
                "UsedForProduction": "false"
            })
        );
    }
}
