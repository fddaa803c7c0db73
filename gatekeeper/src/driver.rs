//! Driver: admission, retry, timeout and monitoring composed around one task.
//!
//! One attempt acquires a permit, starts the task with a fresh cancellation
//! token, feeds its events through a fresh [`ExecutionMonitor`] under a
//! deadline, then cancels the token and releases the permit whatever happened.
//! Retryable failures are retried with backoff; the caller receives either the
//! validated payload or a single [`RunError`] that records the attempt count
//! and elapsed time of the whole run.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::admission::AdmissionController;
use crate::core::backoff::RetryPolicy;
use crate::core::contract::PayloadContract;
use crate::core::monitor::{ExecutionMonitor, MonitorState, SoftWarning};
use crate::core::policy::AbortPolicy;
use crate::core::types::{CountersSnapshot, ExecutionEvent};
use crate::error::{ConfigError, RunError};
use crate::resilience::{RetryError, with_retry_if, with_timeout};

/// Events of one task execution, in emission order.
pub type EventStream = BoxStream<'static, Result<ExecutionEvent, RunError>>;

/// A unit of work that reports progress as events.
///
/// `start` is called once per attempt. The task should stop producing events
/// soon after `cancel` fires.
pub trait MonitoredTask {
    fn start(&self, cancel: CancellationToken) -> EventStream;
}

/// Per-run settings that are not owned by the admission controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    pub retry: RetryPolicy,
    /// Deadline for a single attempt, including the wait for admission.
    pub attempt_timeout: Duration,
    pub policy: AbortPolicy,
}

impl DriverSettings {
    /// Defaults around `policy`: three attempts and a deadline equal to the
    /// monitor's time budget.
    pub fn new(policy: AbortPolicy) -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: policy.time_budget,
            policy,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        self.policy.validate()?;
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::invalid("attempt_timeout must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Payload from the task's successful terminal event, unmodified.
    pub payload: Value,
    pub attempts: u32,
    pub elapsed: Duration,
    pub counters: CountersSnapshot,
}

pub struct Driver<C> {
    admission: Arc<AdmissionController>,
    settings: DriverSettings,
    contract: C,
}

impl<C: PayloadContract> Driver<C> {
    pub fn new(
        admission: Arc<AdmissionController>,
        settings: DriverSettings,
        contract: C,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            admission,
            settings,
            contract,
        })
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Run `task` to completion, retrying retryable failures.
    #[instrument(skip_all, fields(cost = cost))]
    pub async fn run<T>(&self, cost: u64, task: &T) -> Result<RunOutcome, RunError>
    where
        T: MonitoredTask + ?Sized,
    {
        let started = Instant::now();
        let result = with_retry_if(
            &self.settings.retry,
            move |attempt| self.attempt(attempt, cost, task),
            RunError::is_retryable,
        )
        .await;

        let elapsed = started.elapsed();
        match result {
            Ok((payload, counters, attempts)) => {
                info!(
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    turns = counters.turn_count,
                    "run succeeded"
                );
                Ok(RunOutcome {
                    payload,
                    attempts,
                    elapsed,
                    counters,
                })
            }
            Err(RetryError::Exhausted(exhausted)) => Err(RunError::RetryExhausted {
                attempts: exhausted.attempts,
                elapsed,
                last_cause: Box::new(exhausted.last_cause),
            }),
            Err(RetryError::Permanent { attempts, cause }) => Err(RunError::Failed {
                attempts,
                elapsed,
                cause: Box::new(cause),
            }),
        }
    }

    #[instrument(skip_all, fields(attempt = attempt))]
    async fn attempt<T>(
        &self,
        attempt: u32,
        cost: u64,
        task: &T,
    ) -> Result<(Value, CountersSnapshot, u32), RunError>
    where
        T: MonitoredTask + ?Sized,
    {
        let cancel = CancellationToken::new();
        // Cancels the task on every exit path, including this future being dropped.
        let _cancel_on_exit = cancel.clone().drop_guard();

        let attempt_run = async {
            let permit = self.admission.acquire(cost).await;
            let events = task.start(cancel.clone());
            let result = self.observe(events).await;
            permit.release(None);
            result
        };
        let (payload, counters) =
            with_timeout(attempt_run, self.settings.attempt_timeout, Some("task timed out"))
                .await??;
        Ok((payload, counters, attempt))
    }

    async fn observe(
        &self,
        mut events: EventStream,
    ) -> Result<(Value, CountersSnapshot), RunError> {
        let mut monitor =
            ExecutionMonitor::new(self.settings.policy.clone(), &self.contract, Instant::now());
        while let Some(event) = events.next().await {
            let event = event?;
            debug!(event = event.label(), "event");
            monitor.consume(event);
            for warning in monitor.drain_warnings() {
                log_warning(&warning);
            }
            if monitor.state().is_final() {
                break;
            }
        }

        let counters = monitor.counters();
        let state = monitor.into_state();
        match &state {
            MonitorState::Running => {
                warn!(%counters, "event stream ended without a terminal event");
            }
            MonitorState::Aborted { reason, .. } => {
                warn!(?reason, %counters, "monitor aborted task");
            }
            MonitorState::Failed { reason, .. } => warn!(?reason, %counters, "task failed"),
            MonitorState::Succeeded { .. } => debug!(%counters, "task succeeded"),
        }
        let payload = state.into_result(counters.clone())?;
        Ok((payload, counters))
    }
}

fn log_warning(warning: &SoftWarning) {
    match warning {
        SoftWarning::Elapsed {
            checkpoint,
            elapsed,
        } => warn!(
            checkpoint_ms = checkpoint.as_millis() as u64,
            elapsed_ms = elapsed.as_millis() as u64,
            "time checkpoint crossed"
        ),
        SoftWarning::Turns {
            turn_count,
            max_turns,
        } => warn!(turn_count, max_turns, "approaching turn limit"),
    }
}
