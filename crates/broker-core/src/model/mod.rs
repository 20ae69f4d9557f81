// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain model shared by the stores and the workers.
//!
//! An [`Operation`] is one generic core parameterised by its payload. The
//! stored form carries the [`OperationPayload`] tagged union; the typed views
//! (`ProvisioningOperation`, `DeprovisioningOperation`, ...) carry the
//! kind-specific data directly.

mod binding;
mod instance;
mod operation;
mod parameters;
mod payload;
mod query;

pub use binding::{Binding, BindingStats, ExpiredBinding};
pub use instance::Instance;
pub use operation::{
    ErrorComponent, InstanceDetails, LastError, Operation, OperationState, OperationType,
};
pub use parameters::{ErsContext, ProvisioningParameters, RuntimeParameters, SmCredentials};
pub use payload::{
    DeprovisioningData, DeprovisioningOperation, OperationKind, OperationPayload, Payload,
    ProvisioningData, ProvisioningOperation, UpdatingData, UpdatingOperation,
    UpgradeClusterData, UpgradeClusterOperation,
};
pub use query::{
    ErsContextStats, GroupedOperations, InstanceFilter, InstancePage, InstanceStats,
    OperationFilter, OperationPage, OperationStats, OperationStatsV2,
};
