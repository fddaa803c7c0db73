//! Error taxonomy for admission, resilient execution, and monitoring.
//!
//! - [`ConfigError`]: invalid limiter, retry or monitor configuration. The only
//!   way the admission controller can fail.
//! - [`RetryExhausted`] and [`AgentTimeout`]: raised by the resilience
//!   wrappers, generic over the wrapped operation.
//! - [`EventDecodeError`]: a recorded event line could not be read or decoded.
//! - [`RunError`]: the single typed error a [`Driver`](crate::driver::Driver)
//!   caller receives, carrying enough context to diagnose without re-running.

use std::time::Duration;

use thiserror::Error;

use crate::core::types::CountersSnapshot;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(message.into())
    }
}

/// Every attempt of a retried operation failed.
#[derive(Error, Debug)]
#[error("retry exhausted after {attempts} attempts: {last_cause}")]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_cause: E,
}

/// An operation lost its race against a deadline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (deadline {deadline:?})")]
pub struct AgentTimeout {
    pub deadline: Duration,
    pub message: String,
}

/// A JSON-lines event could not be turned into an `ExecutionEvent`.
#[derive(Error, Debug)]
pub enum EventDecodeError {
    #[error("line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("read events: {0}")]
    Io(#[from] std::io::Error),
}

/// Final outcome of a failed driver run.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Timeout(#[from] AgentTimeout),

    #[error(transparent)]
    Decode(#[from] EventDecodeError),

    /// The monitor's hard time budget elapsed while events were still arriving.
    #[error("time budget {budget:?} exceeded ({counters})")]
    TimeBudgetExceeded {
        budget: Duration,
        counters: CountersSnapshot,
    },

    /// An abort heuristic decided the task is unlikely to succeed.
    #[error("early failure: {reason} ({counters})")]
    EarlyFailure {
        reason: String,
        counters: CountersSnapshot,
    },

    #[error("task exhausted its turns ({counters})")]
    MaxTurnsExceeded { counters: CountersSnapshot },

    #[error("result payload failed validation: {} ({counters})", details.join("; "))]
    SchemaValidationFailed {
        details: Vec<String>,
        counters: CountersSnapshot,
    },

    #[error("task ended with unknown terminal status '{status}' ({counters})")]
    UnknownTerminal {
        status: String,
        counters: CountersSnapshot,
    },

    /// The event stream closed without a terminal event.
    #[error("event stream ended without a terminal event ({counters})")]
    StreamEnded { counters: CountersSnapshot },

    /// The task itself reported an error while producing events.
    #[error("task failed: {message}")]
    Task { message: String },

    #[error("retry exhausted after {attempts} attempts in {elapsed:?}: {last_cause}")]
    RetryExhausted {
        attempts: u32,
        elapsed: Duration,
        last_cause: Box<RunError>,
    },

    /// A failure that retrying cannot fix ended the run at attempt `attempts`.
    #[error("run failed on attempt {attempts} after {elapsed:?}: {cause}")]
    Failed {
        attempts: u32,
        elapsed: Duration,
        cause: Box<RunError>,
    },
}

impl RunError {
    /// Whether re-running the whole unit of work could plausibly succeed.
    ///
    /// Payload and status problems are deterministic properties of the task's
    /// contract and are not retried; everything time- or progress-related is.
    pub fn is_retryable(&self) -> bool {
        match self {
            RunError::Timeout(_)
            | RunError::TimeBudgetExceeded { .. }
            | RunError::EarlyFailure { .. }
            | RunError::MaxTurnsExceeded { .. }
            | RunError::StreamEnded { .. }
            | RunError::Task { .. } => true,
            RunError::Config(_)
            | RunError::Decode(_)
            | RunError::SchemaValidationFailed { .. }
            | RunError::UnknownTerminal { .. }
            | RunError::RetryExhausted { .. }
            | RunError::Failed { .. } => false,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RunError::Config(_) => "config_error",
            RunError::Timeout(_) => "agent_timeout",
            RunError::Decode(_) => "event_decode_failed",
            RunError::TimeBudgetExceeded { .. } => "time_budget_exceeded",
            RunError::EarlyFailure { .. } => "early_failure",
            RunError::MaxTurnsExceeded { .. } => "max_turns_exceeded",
            RunError::SchemaValidationFailed { .. } => "schema_validation_failed",
            RunError::UnknownTerminal { .. } => "unknown_terminal",
            RunError::StreamEnded { .. } => "stream_ended",
            RunError::Task { .. } => "task_failed",
            RunError::RetryExhausted { .. } => "retry_exhausted",
            RunError::Failed { .. } => "run_failed",
        }
    }

    /// The error that ended the last attempt, looking through the run wrappers.
    pub fn root_cause(&self) -> &RunError {
        match self {
            RunError::RetryExhausted { last_cause, .. } => last_cause.root_cause(),
            RunError::Failed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Attempts made by the driver run that produced this error.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RunError::RetryExhausted { attempts, .. } | RunError::Failed { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }

    /// Wall-clock time of the driver run that produced this error.
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            RunError::RetryExhausted { elapsed, .. } | RunError::Failed { elapsed, .. } => {
                Some(*elapsed)
            }
            _ => None,
        }
    }

    /// Counters captured when the monitor reached its final state, if any.
    pub fn counters(&self) -> Option<&CountersSnapshot> {
        match self.root_cause() {
            RunError::TimeBudgetExceeded { counters, .. }
            | RunError::EarlyFailure { counters, .. }
            | RunError::MaxTurnsExceeded { counters }
            | RunError::SchemaValidationFailed { counters, .. }
            | RunError::UnknownTerminal { counters, .. }
            | RunError::StreamEnded { counters } => Some(counters),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_exhausted_reports_root_cause() {
        let err = RunError::RetryExhausted {
            attempts: 3,
            elapsed: Duration::from_secs(2),
            last_cause: Box::new(RunError::EarlyFailure {
                reason: "no external fetch".to_string(),
                counters: CountersSnapshot {
                    turn_count: 5,
                    ..CountersSnapshot::default()
                },
            }),
        };
        assert_eq!(err.as_label(), "retry_exhausted");
        assert!(!err.is_retryable());
        assert_eq!(err.root_cause().as_label(), "early_failure");
        assert_eq!(err.counters().map(|c| c.turn_count), Some(5));
        assert!(err.to_string().contains("after 3 attempts"));
        assert!(err.to_string().contains("no external fetch"));
    }

    #[test]
    fn schema_failures_are_not_retryable() {
        let err = RunError::SchemaValidationFailed {
            details: vec!["missing summary".to_string()],
            counters: CountersSnapshot::default(),
        };
        assert!(!err.is_retryable());
        assert!(
            err.to_string()
                .starts_with("result payload failed validation: missing summary (")
        );
    }

    #[test]
    fn failed_run_keeps_attempts_elapsed_and_counters() {
        let err = RunError::Failed {
            attempts: 2,
            elapsed: Duration::from_millis(150),
            cause: Box::new(RunError::UnknownTerminal {
                status: "error_during_execution".to_string(),
                counters: CountersSnapshot {
                    turn_count: 4,
                    ..CountersSnapshot::default()
                },
            }),
        };
        assert_eq!(err.as_label(), "run_failed");
        assert!(!err.is_retryable());
        assert_eq!(err.attempts(), Some(2));
        assert_eq!(err.elapsed(), Some(Duration::from_millis(150)));
        assert_eq!(err.root_cause().as_label(), "unknown_terminal");
        assert_eq!(err.counters().map(|c| c.turn_count), Some(4));
        assert!(err.to_string().starts_with("run failed on attempt 2 after 150ms"));
    }

    #[test]
    fn timeout_message_includes_deadline() {
        let err = AgentTimeout {
            deadline: Duration::from_millis(100),
            message: "review timed out".to_string(),
        };
        assert_eq!(err.to_string(), "review timed out (deadline 100ms)");
        assert!(RunError::from(err).is_retryable());
    }
}
