//! Admission control and resilient execution for long-running agent tasks.
//!
//! The crate gates calls to a scarce downstream resource and watches each call
//! while it runs:
//!
//! - **[`admission`]**: sliding-window request/cost limits plus a FIFO
//!   concurrency cap.
//! - **[`resilience`]**: retry with exponential backoff and jitter, and
//!   deadline races.
//! - **[`core::monitor`]**: a deterministic state machine over a task's
//!   progress events that aborts runs unlikely to succeed and validates the
//!   final payload.
//!
//! [`driver`] composes the three around a [`driver::MonitoredTask`]. The
//! [`core`] modules are pure; [`io`] holds configuration files and recorded
//! event streams.

pub mod admission;
pub mod core;
pub mod driver;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod resilience;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use admission::{AdmissionController, AdmissionStatus, Permit};
pub use driver::{Driver, DriverSettings, EventStream, MonitoredTask, RunOutcome};
pub use error::{AgentTimeout, ConfigError, RetryExhausted, RunError};
