// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Propagation of subaccount label state to external resources.
//!
//! Label-change intents are pushed into a [`PriorityQueue`] keyed by
//! subaccount. A [`LabelUpdater`] drains it, finds every resource labelled
//! with the subaccount and overwrites the beta and production labels. Any
//! failure puts the whole item back; label assignment is an overwrite, so
//! applying an item twice is harmless.

pub mod client;
pub mod mock;
pub mod queue;
pub mod updater;

pub use client::{HttpResourceClient, Resource, ResourceClient, ResourceError, ResourceMetadata};
pub use mock::MockResourceClient;
pub use queue::{PriorityQueue, QueueElement, QueueItem};
pub use updater::{LabelUpdater, LabelUpdaterConfig, ProcessOutcome};

/// Namespace holding the labelled resources.
pub const NAMESPACE: &str = "kcp-system";

pub const SUBACCOUNT_ID_LABEL: &str = "kyma-project.io/subaccount-id";
pub const BETA_ENABLED_LABEL: &str = "operator.kyma-project.io/beta";
pub const USED_FOR_PRODUCTION_LABEL: &str = "operator.kyma-project.io/used-for-production";
