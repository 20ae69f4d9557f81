// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broker Worker - operation step runner and label reconciliation
//!
//! Drives broker operations through their steps and keeps external
//! resource labels in line with subaccount settings.
//!
//! # Operation processing
//!
//! ```text
//!   OperationQueue ──id──▶ worker ──▶ StepRunner::process
//!        ▲                               │ load, run steps in order,
//!        └──── add_after(backoff) ◀──────┘ save progress per step
//! ```
//!
//! A step returns the (possibly updated) operation, a backoff and an
//! optional error. A zero backoff without error means the step is done; a
//! nonzero backoff reschedules the operation; an error with zero backoff
//! fails it. All saves go through [`process::OperationManager`], which
//! reloads and reapplies the change when another worker got there first.
//!
//! # Label reconciliation
//!
//! [`labels::LabelUpdater`] drains a [`labels::PriorityQueue`] and sets the
//! beta and production labels on every resource labelled with the item's
//! subaccount, requeuing the item on any failure.

pub mod config;
pub mod error;
pub mod labels;
pub mod process;
pub mod runtime;
pub mod steps;

pub use error::{ProcessError, StepError};
pub use process::{OperationManager, OperationQueue, Step, StepResult, StepRunner};
pub use runtime::WorkerRuntime;
