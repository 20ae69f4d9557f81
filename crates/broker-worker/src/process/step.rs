// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The step contract.

use std::time::Duration;

use async_trait::async_trait;
use broker_core::model::{Operation, OperationKind};
use tracing::Span;

use crate::error::StepError;

/// Outcome of one [`Step::run`] call.
///
/// - zero `backoff` and no `error`: the step is done, move on;
/// - nonzero `backoff`: run the same step again after the delay, whatever
///   `error` holds;
/// - zero `backoff` with an `error`: the operation fails.
#[derive(Debug)]
pub struct StepResult<K> {
    /// The operation as the step left it. Its version may be one ahead of
    /// the version the step was given.
    pub operation: Operation<K>,
    pub backoff: Duration,
    pub error: Option<StepError>,
}

impl<K> StepResult<K> {
    pub fn done(operation: Operation<K>) -> Self {
        Self {
            operation,
            backoff: Duration::ZERO,
            error: None,
        }
    }

    pub fn retry(operation: Operation<K>, backoff: Duration) -> Self {
        Self {
            operation,
            backoff,
            error: None,
        }
    }

    pub fn retry_with_error(operation: Operation<K>, backoff: Duration, error: StepError) -> Self {
        Self {
            operation,
            backoff,
            error: Some(error),
        }
    }

    pub fn fail(operation: Operation<K>, error: StepError) -> Self {
        Self {
            operation,
            backoff: Duration::ZERO,
            error: Some(error),
        }
    }

    pub fn is_done(&self) -> bool {
        self.backoff.is_zero() && self.error.is_none()
    }
}

/// One idempotent unit of work in an operation's workflow.
///
/// A step may be run again after a crash or a backoff, so everything it
/// writes must be safe to apply twice.
#[async_trait]
pub trait Step<K: OperationKind>: Send + Sync {
    /// Stable name, recorded in the operation's finished stages.
    fn name(&self) -> &'static str;

    /// Execute the step. Log through `log` (`tracing::info!(parent: log, ...)`)
    /// so events carry the operation and step context.
    async fn run(&self, operation: Operation<K>, log: &Span) -> StepResult<K>;
}
