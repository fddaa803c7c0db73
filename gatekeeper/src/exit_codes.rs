//! Stable exit codes for gatekeeper CLI commands.

use crate::error::RunError;

/// Command succeeded; `replay` produced a validated payload.
pub const OK: i32 = 0;
/// Invalid config, unreadable input, or any other error.
pub const INVALID: i32 = 1;
/// `replay` was aborted by the monitor or ran out of time.
pub const ABORTED: i32 = 2;
/// `replay` reached a terminal failure (bad payload, unknown status, turn limit).
pub const FAILED: i32 = 3;

/// Exit code for a failed run, judged by the cause of the last attempt.
pub fn for_run_error(err: &RunError) -> i32 {
    match err.root_cause() {
        RunError::Timeout(_)
        | RunError::TimeBudgetExceeded { .. }
        | RunError::EarlyFailure { .. } => ABORTED,
        RunError::MaxTurnsExceeded { .. }
        | RunError::SchemaValidationFailed { .. }
        | RunError::UnknownTerminal { .. }
        | RunError::StreamEnded { .. } => FAILED,
        _ => INVALID,
    }
}
