// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Steps run by the operation runners.

pub mod remove_instance;

pub use remove_instance::RemoveInstanceStep;
