//! Abort thresholds applied by the execution monitor.

use std::time::Duration;

use crate::core::types::ToolKind;
use crate::error::ConfigError;

/// Fraction of `max_turns` at which the turn checkpoint warns.
const TURN_WARNING_PERCENT: u64 = 80;

/// "By turn `turn`, at least `min_count` invocations of `kind`."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindRule {
    pub turn: u32,
    pub kind: ToolKind,
    pub min_count: u32,
    /// Reason attached to the early failure when the rule trips.
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortPolicy {
    /// Hard wall-clock budget; exceeding it aborts on the next event.
    pub time_budget: Duration,
    pub rules: Vec<KindRule>,
    /// Elapsed-time checkpoints that only warn.
    pub soft_checkpoints: Vec<Duration>,
    /// Turn limit the task was started with, if known. Drives the 80% warning.
    pub max_turns: Option<u32>,
    /// Number of trailing tool names kept for diagnostics.
    pub recent_tool_limit: usize,
}

impl AbortPolicy {
    pub fn new(time_budget: Duration) -> Self {
        Self {
            time_budget,
            rules: Vec::new(),
            soft_checkpoints: Vec::new(),
            max_turns: None,
            recent_tool_limit: 10,
        }
    }

    /// Abort when no `kind` tool was used by `turn`.
    pub fn with_early_stall(mut self, turn: u32, kind: ToolKind) -> Self {
        self.rules.push(KindRule {
            turn,
            kind,
            min_count: 1,
            reason: format!("no external {kind}"),
        });
        self
    }

    /// Abort when fewer than `min_count` `kind` tools were used by `turn`.
    pub fn with_delegation(mut self, turn: u32, kind: ToolKind, min_count: u32) -> Self {
        self.rules.push(KindRule {
            turn,
            kind,
            min_count,
            reason: "insufficient delegation".to_string(),
        });
        self
    }

    pub fn with_soft_checkpoints(mut self, checkpoints: Vec<Duration>) -> Self {
        self.soft_checkpoints = checkpoints;
        self.soft_checkpoints.sort();
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    /// Turn count at which the turn checkpoint warns.
    pub fn turn_warning_at(&self) -> Option<u32> {
        self.max_turns.map(|max| {
            let at = (u64::from(max) * TURN_WARNING_PERCENT).div_ceil(100);
            u32::try_from(at).unwrap_or(max).max(1)
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.time_budget.is_zero() {
            return Err(ConfigError::invalid("time_budget must be > 0"));
        }
        for rule in &self.rules {
            if rule.turn == 0 {
                return Err(ConfigError::invalid(format!(
                    "rule '{}' must trigger at turn > 0",
                    rule.reason
                )));
            }
        }
        if self.max_turns == Some(0) {
            return Err(ConfigError::invalid("max_turns must be > 0"));
        }
        if let Some(past) = self
            .soft_checkpoints
            .iter()
            .find(|checkpoint| **checkpoint >= self.time_budget)
        {
            return Err(ConfigError::invalid(format!(
                "soft checkpoint {past:?} is not below time_budget {:?}",
                self.time_budget
            )));
        }
        Ok(())
    }
}
