//! Execution strategy: timing, retries and failure handling around every
//! dispatched call.

use crate::dispatch::{
    invoke, ConfiguredOperation, DispatchTarget, OperationKind, OperationOutcome,
    PreparedOperation,
};
use crate::error::OperationError;
use crate::metrics::{ActorIdentity, Counter, MetricsRegistry, Timer};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::warn;
use workload_core::{BackendError, DurationSpec, WriteCounts};

/// Base delay between retries; doubled per attempt up to 16x.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(10);

/// `ExecutionStrategy` block of an actor or phase.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ExecutionStrategyOptions {
    /// Propagate the first unrecovered failure out of the phase
    #[serde(default)]
    pub throw_on_failure: bool,

    /// Extra attempts for transient failures of idempotent operations
    #[serde(default)]
    pub retries: u32,

    #[serde(default)]
    pub retry_delay: Option<DurationSpec>,
}

impl ExecutionStrategyOptions {
    fn retry_delay(&self, retry: u32) -> Duration {
        let base = self
            .retry_delay
            .map(Duration::from)
            .unwrap_or(RETRY_BASE_DELAY);
        base.checked_mul(1u32 << (retry.saturating_sub(1)).min(4)).unwrap_or(Duration::MAX)
    }
}

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// May succeed if retried with the same arguments
    Transient,
    /// Non-transient backend failure
    Failed,
    /// Session misuse or other workload mistake
    Usage,
}

impl Classification {
    pub fn of(result: &Result<OperationOutcome, OperationError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) if e.is_usage() => Self::Usage,
            Err(e) if e.is_transient() => Self::Transient,
            Err(_) => Self::Failed,
        }
    }
}

/// Final result of one operation after retries.
#[derive(Debug)]
pub struct ExecutionResult {
    pub attempts: u32,
    /// Duration of the last attempt
    pub elapsed: Duration,
    pub classification: Classification,
    pub outcome: Result<OperationOutcome, OperationError>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.classification == Classification::Success
    }
}

/// Timer and counters for one configured operation of one actor instance.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    timer: Timer,
    inserted: Option<Counter>,
    updated: Option<Counter>,
    deleted: Option<Counter>,
    upserted: Option<Counter>,
    found: Option<Counter>,
}

impl OperationMetrics {
    /// Register the timer named after the operation and the counters its
    /// kind can move.
    pub fn for_operation(
        registry: &MetricsRegistry,
        actor: &ActorIdentity,
        operation: &ConfiguredOperation,
    ) -> Self {
        let counter = |name: &str| Some(registry.counter(actor, name));
        let mut metrics = Self::with_timer(registry.timer(actor, operation.metrics_name()));
        match operation.kind() {
            OperationKind::InsertOne | OperationKind::InsertMany => {
                metrics.inserted = counter("insertedDocuments");
            }
            OperationKind::UpdateOne | OperationKind::UpdateMany | OperationKind::ReplaceOne => {
                metrics.updated = counter("updatedDocuments");
                metrics.upserted = counter("upsertedDocuments");
            }
            OperationKind::DeleteOne | OperationKind::DeleteMany => {
                metrics.deleted = counter("deletedDocuments");
            }
            OperationKind::BulkWrite => {
                metrics.inserted = counter("insertedDocuments");
                metrics.updated = counter("updatedDocuments");
                metrics.deleted = counter("deletedDocuments");
                metrics.upserted = counter("upsertedDocuments");
            }
            OperationKind::CountDocuments | OperationKind::Find => {
                metrics.found = counter("documentsFound");
            }
            OperationKind::Drop
            | OperationKind::StartTransaction
            | OperationKind::CommitTransaction
            | OperationKind::AbortTransaction => {}
        }
        metrics
    }

    /// Only a timer; add counters with the `with_*` methods.
    pub fn with_timer(timer: Timer) -> Self {
        Self {
            timer,
            inserted: None,
            updated: None,
            deleted: None,
            upserted: None,
            found: None,
        }
    }

    /// Counter accumulating modified counts.
    pub fn with_updated(mut self, counter: Counter) -> Self {
        self.updated = Some(counter);
        self
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    fn record_counts(&self, counts: &WriteCounts) {
        let add = |counter: &Option<Counter>, n: u64| {
            if let Some(c) = counter {
                if n > 0 {
                    c.incr(n);
                }
            }
        };
        add(&self.inserted, counts.inserted);
        add(&self.updated, counts.modified);
        add(&self.deleted, counts.deleted);
        add(&self.upserted, counts.upserted);
    }

    fn record(&self, elapsed: Duration, result: &Result<OperationOutcome, OperationError>) {
        match result {
            Ok(outcome) => {
                self.timer.record(elapsed, true);
                self.record_counts(&outcome.counts);
                if let Some(found) = &self.found {
                    found.incr(outcome.documents_returned);
                }
            }
            Err(e) => {
                self.timer.record(elapsed, false);
                // Items a failed bulk write did apply still happened
                if let Some(BackendError::BulkWrite(failure)) = e.backend_error() {
                    self.record_counts(&failure.counts);
                }
            }
        }
    }
}

/// Applies an actor's execution strategy to every operation it runs.
#[derive(Debug)]
pub struct ExecutionStrategy {
    options: ExecutionStrategyOptions,
    failures: u64,
    last_error: Option<OperationError>,
}

impl ExecutionStrategy {
    pub fn new(options: ExecutionStrategyOptions) -> Self {
        Self {
            options,
            failures: 0,
            last_error: None,
        }
    }

    pub fn options(&self) -> &ExecutionStrategyOptions {
        &self.options
    }

    /// Replace the options, keeping failure counts.
    pub fn set_options(&mut self, options: ExecutionStrategyOptions) {
        self.options = options;
    }

    /// Operations that ended in failure after all attempts.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn last_error(&self) -> Option<&OperationError> {
        self.last_error.as_ref()
    }

    /// Run one operation with the given prepared arguments.
    ///
    /// Returns `Err` only when the phase must stop: a usage error in any
    /// mode, or an unrecovered failure under `ThrowOnFailure`. Otherwise the
    /// failure is recorded and returned inside the [`ExecutionResult`].
    pub async fn attempt(
        &mut self,
        operation: &ConfiguredOperation,
        prepared: &PreparedOperation,
        metrics: &OperationMetrics,
        target: &mut DispatchTarget<'_>,
    ) -> Result<ExecutionResult, OperationError> {
        let max_attempts = if operation.is_idempotent() {
            self.options.retries.saturating_add(1)
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                let delay = self.options.retry_delay(attempt - 1);
                warn!(
                    "Retrying {} on {} (attempt {}/{}), waiting {}ms",
                    operation.metrics_name(),
                    target.namespace,
                    attempt,
                    max_attempts,
                    delay.as_millis()
                );
                sleep(delay).await;
            }

            let started = Instant::now();
            let outcome = invoke(operation, prepared, target).await;
            let elapsed = started.elapsed();
            let classification = Classification::of(&outcome);

            // Usage errors never reached the backend, so they get no sample
            if classification != Classification::Usage {
                metrics.record(elapsed, &outcome);
            }

            let error = match outcome {
                Ok(_) => {
                    return Ok(ExecutionResult {
                        attempts: attempt,
                        elapsed,
                        classification,
                        outcome,
                    })
                }
                Err(e) => e,
            };

            if classification == Classification::Transient && attempt < max_attempts {
                warn!(
                    "Transient failure of {}: {}",
                    operation.metrics_name(),
                    error
                );
                continue;
            }

            self.failures += 1;
            self.last_error = Some(error.clone());
            if classification == Classification::Usage || self.options.throw_on_failure {
                return Err(error);
            }
            warn!(
                "{} failed after {} attempt(s): {}",
                operation.metrics_name(),
                attempt,
                error
            );
            return Ok(ExecutionResult {
                attempts: attempt,
                elapsed,
                classification,
                outcome: Err(error),
            });
        }
    }
}
