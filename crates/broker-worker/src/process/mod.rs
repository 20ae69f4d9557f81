// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Step execution: the step contract, optimistic-lock updates, the runner
//! and the work queue feeding it.

pub mod manager;
pub mod queue;
pub mod runner;
pub mod step;

pub use manager::{OperationManager, UPDATE_RETRY_BACKOFF};
pub use queue::{Executor, OperationQueue};
pub use runner::{DEFAULT_OPERATION_TIMEOUT, StepRunner};
pub use step::{Step, StepResult};
