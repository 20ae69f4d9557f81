// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Drives an operation through its ordered steps.
//!
//! Each call to [`StepRunner::process`] loads the operation, skips the steps
//! already listed in its finished stages and runs the rest in order until one
//! asks for a backoff, one fails, or all are done. Progress is saved after
//! every finished step, so a crashed worker resumes where it stopped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker_core::model::{LastError, Operation, OperationKind, OperationState};
use chrono::Utc;
use tracing::{Span, debug, info, info_span, warn};

use crate::error::{ProcessError, StepError};

use super::manager::OperationManager;
use super::queue::Executor;
use super::step::{Step, StepResult};

/// Default time after creation at which a retrying operation is failed.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

pub struct StepRunner<K: OperationKind> {
    manager: OperationManager,
    steps: Vec<Arc<dyn Step<K>>>,
    operation_timeout: Duration,
}

impl<K: OperationKind> std::fmt::Debug for StepRunner<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("operation_type", &K::TYPE)
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl<K: OperationKind> StepRunner<K> {
    pub fn new(manager: OperationManager) -> Self {
        Self {
            manager,
            steps: Vec::new(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Append a step. Steps run in the order they are added.
    pub fn with_step(mut self, step: Arc<dyn Step<K>>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Advance the operation. Returns the delay after which it wants to be
    /// processed again, or zero once it needs nothing more.
    pub async fn process(&self, operation_id: &str) -> Result<Duration, ProcessError> {
        let mut operation = self
            .manager
            .operations()
            .get_by_id::<K>(operation_id)
            .await?;

        let span = info_span!(
            "operation",
            operation_id = %operation.id,
            instance_id = %operation.instance_id,
            operation_type = %K::TYPE,
        );

        if operation.state.is_terminal() {
            debug!(parent: &span, state = %operation.state, "Operation already finished");
            return Ok(Duration::ZERO);
        }

        if operation.state == OperationState::Pending {
            let (started, backoff) = self
                .manager
                .update_operation(operation, |op| op.state = OperationState::InProgress, &span)
                .await;
            if !backoff.is_zero() {
                return Ok(backoff);
            }
            operation = started;
        }

        for step in &self.steps {
            let name = step.name();
            if operation.is_stage_finished(name) {
                debug!(parent: &span, step = name, "Skipping finished step");
                continue;
            }

            let step_span = info_span!(parent: &span, "step", step = name);
            let StepResult {
                operation: returned,
                backoff,
                error,
            } = step.run(operation, &step_span).await;
            operation = returned;

            if let Some(err) = &error {
                if err.is_fatal() || backoff.is_zero() {
                    return Ok(self.fail(operation, name, err, &span).await);
                }
            }

            if !backoff.is_zero() {
                return Ok(self.reschedule(operation, name, backoff, error, &span).await);
            }

            let (saved, backoff) = self
                .manager
                .update_operation(operation, |op| op.mark_stage_finished(name), &span)
                .await;
            if !backoff.is_zero() {
                return Ok(backoff);
            }
            operation = saved;
            info!(parent: &span, step = name, "Step finished");
        }

        let (_, backoff) = self
            .manager
            .operation_succeeded(operation, "", &span)
            .await;
        Ok(backoff)
    }

    /// Mark the operation failed. A non-zero result means the failed state
    /// could not be saved and the operation must be processed again.
    async fn fail(
        &self,
        operation: Operation<K>,
        step: &str,
        error: &StepError,
        log: &Span,
    ) -> Duration {
        let last_error = LastError {
            component: error.component(),
            step: step.to_string(),
            message: error.to_string(),
        };
        let (_, backoff) = self
            .manager
            .operation_failed(operation, &error.to_string(), Some(last_error), log)
            .await;
        backoff
    }

    async fn reschedule(
        &self,
        operation: Operation<K>,
        step: &str,
        backoff: Duration,
        error: Option<StepError>,
        log: &Span,
    ) -> Duration {
        let last_error = error.map(|err| LastError {
            component: err.component(),
            step: step.to_string(),
            message: err.to_string(),
        });

        if self.budget_exhausted(&operation) {
            let description = last_error
                .as_ref()
                .or(operation.last_error.as_ref())
                .map(|e| e.message.clone())
                .unwrap_or_else(|| format!("step {step} did not finish within the retry budget"));
            warn!(
                parent: log,
                step,
                timeout_secs = self.operation_timeout.as_secs(),
                "Operation exceeded its retry budget"
            );
            let last_error = last_error.or_else(|| operation.last_error.clone());
            let (_, backoff) = self
                .manager
                .operation_failed(operation, &description, last_error, log)
                .await;
            return backoff;
        }

        if let Some(last_error) = last_error {
            warn!(
                parent: log,
                step,
                error = %last_error.message,
                backoff_ms = backoff.as_millis() as u64,
                "Step failed, retrying later"
            );
            let (_, save_backoff) = self.manager.record_error(operation, last_error, log).await;
            if !save_backoff.is_zero() {
                warn!(
                    parent: log,
                    step,
                    backoff_ms = save_backoff.as_millis() as u64,
                    "Unable to record step error"
                );
                return backoff.max(save_backoff);
            }
        } else {
            debug!(
                parent: log,
                step,
                backoff_ms = backoff.as_millis() as u64,
                "Step asked to be retried"
            );
        }
        backoff
    }

    fn budget_exhausted(&self, operation: &Operation<K>) -> bool {
        let age = Utc::now().signed_duration_since(operation.created_at);
        age.to_std().is_ok_and(|age| age > self.operation_timeout)
    }
}

#[async_trait]
impl<K: OperationKind> Executor for StepRunner<K> {
    async fn execute(&self, operation_id: &str) -> Result<Duration, ProcessError> {
        self.process(operation_id).await
    }
}
