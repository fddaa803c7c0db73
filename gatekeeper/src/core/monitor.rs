//! Execution monitor: a reducer over one task's progress events.
//!
//! The monitor owns the counters for a single task execution and applies the
//! [`AbortPolicy`] to each event in arrival order. Every transition is a pure
//! function of the event sequence and the instants passed to
//! [`ExecutionMonitor::consume_at`]; only the elapsed-time checks depend on the
//! clock, so a frozen clock gives identical transitions on every run.
//!
//! States:
//! - `Running` until one of the others is reached.
//! - `Aborted` when the time budget or an early-failure rule trips.
//! - `Succeeded` when the task ends successfully with a payload that satisfies
//!   the [`PayloadContract`].
//! - `Failed` when the task ends any other way.
//!
//! All states except `Running` are final; later events are ignored.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::core::contract::PayloadContract;
use crate::core::policy::AbortPolicy;
use crate::core::types::{CountersSnapshot, ExecutionEvent, TerminalStatus, ToolKind};
use crate::error::RunError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    TimeExceeded { elapsed: Duration, budget: Duration },
    EarlyFailure { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    SchemaValidationFailed { details: Vec<String> },
    MaxTurnsExceeded,
    UnknownTerminal { status: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorState {
    Running,
    Aborted {
        reason: AbortReason,
        counters: CountersSnapshot,
    },
    Succeeded {
        payload: Value,
    },
    Failed {
        reason: FailureReason,
        counters: CountersSnapshot,
    },
}

impl MonitorState {
    pub fn is_final(&self) -> bool {
        !matches!(self, MonitorState::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            MonitorState::Running => "running",
            MonitorState::Aborted { .. } => "aborted",
            MonitorState::Succeeded { .. } => "succeeded",
            MonitorState::Failed { .. } => "failed",
        }
    }

    /// Convert a final state into the payload or the matching typed error.
    ///
    /// `Running` maps to [`RunError::StreamEnded`]: the caller only asks once
    /// the event stream is over.
    pub fn into_result(self, counters: CountersSnapshot) -> Result<Value, RunError> {
        match self {
            MonitorState::Succeeded { payload } => Ok(payload),
            MonitorState::Running => Err(RunError::StreamEnded { counters }),
            MonitorState::Aborted { reason, counters } => Err(match reason {
                AbortReason::TimeExceeded { budget, .. } => {
                    RunError::TimeBudgetExceeded { budget, counters }
                }
                AbortReason::EarlyFailure { reason } => RunError::EarlyFailure { reason, counters },
            }),
            MonitorState::Failed { reason, counters } => Err(match reason {
                FailureReason::SchemaValidationFailed { details } => {
                    RunError::SchemaValidationFailed { details, counters }
                }
                FailureReason::MaxTurnsExceeded => RunError::MaxTurnsExceeded { counters },
                FailureReason::UnknownTerminal { status } => {
                    RunError::UnknownTerminal { status, counters }
                }
            }),
        }
    }
}

/// Checkpoint crossed without changing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoftWarning {
    Elapsed {
        checkpoint: Duration,
        elapsed: Duration,
    },
    Turns {
        turn_count: u32,
        max_turns: u32,
    },
}

pub struct ExecutionMonitor<C> {
    policy: AbortPolicy,
    contract: C,
    started: bool,
    started_at: Instant,
    elapsed: Duration,
    turn_count: u32,
    per_kind_counts: BTreeMap<ToolKind, u32>,
    recent_tool_names: VecDeque<String>,
    evaluated_rules: Vec<bool>,
    next_checkpoint: usize,
    turn_warning_sent: bool,
    pending_warnings: Vec<SoftWarning>,
    state: MonitorState,
}

impl<C: PayloadContract> ExecutionMonitor<C> {
    /// Create a monitor whose clock starts at `now`.
    ///
    /// The clock restarts when the `Started` event arrives.
    pub fn new(policy: AbortPolicy, contract: C, now: Instant) -> Self {
        let evaluated_rules = vec![false; policy.rules.len()];
        Self {
            policy,
            contract,
            started: false,
            started_at: now,
            elapsed: Duration::ZERO,
            turn_count: 0,
            per_kind_counts: BTreeMap::new(),
            recent_tool_names: VecDeque::new(),
            evaluated_rules,
            next_checkpoint: 0,
            turn_warning_sent: false,
            pending_warnings: Vec::new(),
            state: MonitorState::Running,
        }
    }

    pub fn policy(&self) -> &AbortPolicy {
        &self.policy
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn into_state(self) -> MonitorState {
        self.state
    }

    pub fn counters(&self) -> CountersSnapshot {
        CountersSnapshot {
            elapsed: self.elapsed,
            turn_count: self.turn_count,
            per_kind_counts: self.per_kind_counts.clone(),
            recent_tool_names: self.recent_tool_names.iter().cloned().collect(),
        }
    }

    /// Soft warnings raised since the last call.
    pub fn drain_warnings(&mut self) -> Vec<SoftWarning> {
        std::mem::take(&mut self.pending_warnings)
    }

    /// Feed one event observed at the current instant.
    pub fn consume(&mut self, event: ExecutionEvent) -> &MonitorState {
        self.consume_at(event, Instant::now())
    }

    /// Feed one event observed at `now`.
    pub fn consume_at(&mut self, event: ExecutionEvent, now: Instant) -> &MonitorState {
        if self.state.is_final() {
            return &self.state;
        }

        if matches!(event, ExecutionEvent::Started) && !self.started {
            self.started = true;
            self.started_at = now;
        }
        self.elapsed = self
            .elapsed
            .max(now.saturating_duration_since(self.started_at));

        if self.elapsed > self.policy.time_budget {
            self.state = MonitorState::Aborted {
                reason: AbortReason::TimeExceeded {
                    elapsed: self.elapsed,
                    budget: self.policy.time_budget,
                },
                counters: self.counters(),
            };
            return &self.state;
        }

        match event {
            ExecutionEvent::Started => {}
            ExecutionEvent::ToolInvoked { kind, name } => {
                self.turn_count += 1;
                *self.per_kind_counts.entry(kind).or_insert(0) += 1;
                self.recent_tool_names.push_back(name);
                while self.recent_tool_names.len() > self.policy.recent_tool_limit {
                    self.recent_tool_names.pop_front();
                }
            }
            ExecutionEvent::TurnCompleted { index } => {
                self.turn_count = self.turn_count.max(index);
            }
            ExecutionEvent::Terminal { status, payload } => {
                self.state = self.resolve_terminal(status, payload);
                return &self.state;
            }
        }

        self.check_soft_checkpoints();
        if let Some(reason) = self.check_rules() {
            self.state = MonitorState::Aborted {
                reason: AbortReason::EarlyFailure { reason },
                counters: self.counters(),
            };
        }
        &self.state
    }

    fn resolve_terminal(&self, status: TerminalStatus, payload: Option<Value>) -> MonitorState {
        match status {
            TerminalStatus::Success => {
                let Some(payload) = payload else {
                    return MonitorState::Failed {
                        reason: FailureReason::SchemaValidationFailed {
                            details: vec!["missing result payload".to_string()],
                        },
                        counters: self.counters(),
                    };
                };
                match self.contract.validate(&payload) {
                    Ok(()) => MonitorState::Succeeded { payload },
                    Err(details) => MonitorState::Failed {
                        reason: FailureReason::SchemaValidationFailed { details },
                        counters: self.counters(),
                    },
                }
            }
            TerminalStatus::MaxTurnsExhausted => MonitorState::Failed {
                reason: FailureReason::MaxTurnsExceeded,
                counters: self.counters(),
            },
            TerminalStatus::Other(status) => MonitorState::Failed {
                reason: FailureReason::UnknownTerminal { status },
                counters: self.counters(),
            },
        }
    }

    /// Evaluate each rule once, the first time its turn is reached.
    fn check_rules(&mut self) -> Option<String> {
        for (rule, evaluated) in self.policy.rules.iter().zip(self.evaluated_rules.iter_mut()) {
            if *evaluated || self.turn_count < rule.turn {
                continue;
            }
            *evaluated = true;
            let count = self.per_kind_counts.get(&rule.kind).copied().unwrap_or(0);
            if count < rule.min_count {
                return Some(rule.reason.clone());
            }
        }
        None
    }

    fn check_soft_checkpoints(&mut self) {
        while let Some(checkpoint) = self.policy.soft_checkpoints.get(self.next_checkpoint) {
            if self.elapsed < *checkpoint {
                break;
            }
            self.pending_warnings.push(SoftWarning::Elapsed {
                checkpoint: *checkpoint,
                elapsed: self.elapsed,
            });
            self.next_checkpoint += 1;
        }

        if self.turn_warning_sent {
            return;
        }
        if let (Some(threshold), Some(max_turns)) =
            (self.policy.turn_warning_at(), self.policy.max_turns)
            && self.turn_count >= threshold
        {
            self.turn_warning_sent = true;
            self.pending_warnings.push(SoftWarning::Turns {
                turn_count: self.turn_count,
                max_turns,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contract::{AcceptAny, JsonSchemaContract};
    use serde_json::json;

    fn stall_policy() -> AbortPolicy {
        AbortPolicy::new(Duration::from_secs(600)).with_early_stall(5, ToolKind::Fetch)
    }

    fn other_tool(n: u32) -> ExecutionEvent {
        ExecutionEvent::ToolInvoked {
            kind: ToolKind::Other,
            name: format!("tool-{n}"),
        }
    }

    #[test]
    fn early_stall_aborts_exactly_at_configured_turn() {
        let now = Instant::now();
        let mut monitor = ExecutionMonitor::new(stall_policy(), AcceptAny, now);
        assert_eq!(
            monitor.consume_at(ExecutionEvent::Started, now),
            &MonitorState::Running
        );
        for n in 1..=4 {
            assert_eq!(
                monitor.consume_at(other_tool(n), now),
                &MonitorState::Running,
                "aborted early at turn {n}"
            );
        }

        let state = monitor.consume_at(other_tool(5), now).clone();
        match state {
            MonitorState::Aborted {
                reason: AbortReason::EarlyFailure { reason },
                counters,
            } => {
                assert_eq!(reason, "no external fetch");
                assert_eq!(counters.turn_count, 5);
                assert_eq!(counters.count(ToolKind::Other), 5);
                assert_eq!(counters.count(ToolKind::Fetch), 0);
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn fetch_before_stall_turn_keeps_running() {
        let now = Instant::now();
        let mut monitor = ExecutionMonitor::new(stall_policy(), AcceptAny, now);
        monitor.consume_at(ExecutionEvent::Started, now);
        monitor.consume_at(ExecutionEvent::tool("mcp__github__get_pull_request"), now);
        for n in 2..=8 {
            monitor.consume_at(other_tool(n), now);
        }
        assert_eq!(monitor.state(), &MonitorState::Running);
        assert_eq!(monitor.counters().turn_count, 8);
    }

    #[test]
    fn delegation_rule_requires_minimum_count() {
        let now = Instant::now();
        let policy =
            AbortPolicy::new(Duration::from_secs(600)).with_delegation(3, ToolKind::Delegate, 2);
        let mut monitor = ExecutionMonitor::new(policy, AcceptAny, now);
        monitor.consume_at(ExecutionEvent::Started, now);
        monitor.consume_at(ExecutionEvent::tool("Task"), now);
        monitor.consume_at(ExecutionEvent::tool("Read"), now);
        let state = monitor.consume_at(ExecutionEvent::tool("Grep"), now);
        assert!(matches!(
            state,
            MonitorState::Aborted {
                reason: AbortReason::EarlyFailure { reason },
                ..
            } if reason == "insufficient delegation"
        ));
    }

    #[test]
    fn turn_completed_jump_triggers_rule_once() {
        let now = Instant::now();
        let mut monitor = ExecutionMonitor::new(stall_policy(), AcceptAny, now);
        monitor.consume_at(ExecutionEvent::Started, now);
        monitor.consume_at(ExecutionEvent::tool("mcp__github__get_pull_request"), now);
        monitor.consume_at(ExecutionEvent::TurnCompleted { index: 7 }, now);
        assert_eq!(monitor.state(), &MonitorState::Running);
        assert_eq!(monitor.counters().turn_count, 7);

        // Lower indexes never move the counter backwards.
        monitor.consume_at(ExecutionEvent::TurnCompleted { index: 2 }, now);
        assert_eq!(monitor.counters().turn_count, 7);
    }

    #[test]
    fn time_budget_aborts_on_any_event() {
        let start = Instant::now();
        let policy = AbortPolicy::new(Duration::from_secs(10));
        let mut monitor = ExecutionMonitor::new(policy, AcceptAny, start);
        monitor.consume_at(ExecutionEvent::Started, start);
        monitor.consume_at(other_tool(1), start + Duration::from_secs(10));
        assert_eq!(monitor.state(), &MonitorState::Running);

        let state = monitor.consume_at(
            ExecutionEvent::Terminal {
                status: TerminalStatus::Success,
                payload: Some(json!({})),
            },
            start + Duration::from_secs(11),
        );
        assert!(matches!(
            state,
            MonitorState::Aborted {
                reason: AbortReason::TimeExceeded { .. },
                ..
            }
        ));
    }

    #[test]
    fn invalid_payload_fails_schema_validation() {
        let now = Instant::now();
        let contract = JsonSchemaContract::review_report().expect("schema");
        let mut monitor =
            ExecutionMonitor::new(AbortPolicy::new(Duration::from_secs(60)), contract, now);
        monitor.consume_at(ExecutionEvent::Started, now);
        monitor.consume_at(ExecutionEvent::tool("mcp__github__get_pull_request"), now);
        monitor.consume_at(
            ExecutionEvent::Terminal {
                status: TerminalStatus::Success,
                payload: Some(json!({ "summary": "not a report" })),
            },
            now,
        );
        let state = monitor.into_state();
        assert!(matches!(
            &state,
            MonitorState::Failed {
                reason: FailureReason::SchemaValidationFailed { details },
                ..
            } if !details.is_empty()
        ));
        let err = state.into_result(CountersSnapshot::default()).unwrap_err();
        assert_eq!(err.as_label(), "schema_validation_failed");
        let counters = err.counters().expect("failure keeps its counters");
        assert_eq!(counters.turn_count, 1);
        assert_eq!(counters.count(ToolKind::Fetch), 1);
    }

    #[test]
    fn terminal_statuses_map_to_failures() {
        let now = Instant::now();
        let policy = AbortPolicy::new(Duration::from_secs(60));

        let mut monitor = ExecutionMonitor::new(policy.clone(), AcceptAny, now);
        monitor.consume_at(
            ExecutionEvent::Terminal {
                status: TerminalStatus::MaxTurnsExhausted,
                payload: None,
            },
            now,
        );
        assert!(matches!(
            monitor.state(),
            MonitorState::Failed {
                reason: FailureReason::MaxTurnsExceeded,
                ..
            }
        ));

        let mut monitor = ExecutionMonitor::new(policy.clone(), AcceptAny, now);
        monitor.consume_at(
            ExecutionEvent::Terminal {
                status: TerminalStatus::parse("error_during_execution"),
                payload: None,
            },
            now,
        );
        assert!(matches!(
            monitor.state(),
            MonitorState::Failed {
                reason: FailureReason::UnknownTerminal { status },
                ..
            } if status == "error_during_execution"
        ));

        let mut monitor = ExecutionMonitor::new(policy, AcceptAny, now);
        monitor.consume_at(
            ExecutionEvent::Terminal {
                status: TerminalStatus::Success,
                payload: None,
            },
            now,
        );
        assert!(matches!(
            monitor.state(),
            MonitorState::Failed {
                reason: FailureReason::SchemaValidationFailed { .. },
                ..
            }
        ));
    }

    #[test]
    fn success_forwards_payload_unmodified() {
        let now = Instant::now();
        let payload = json!({ "anything": [1, 2, 3] });
        let mut monitor =
            ExecutionMonitor::new(AbortPolicy::new(Duration::from_secs(60)), AcceptAny, now);
        monitor.consume_at(ExecutionEvent::Started, now);
        monitor.consume_at(
            ExecutionEvent::Terminal {
                status: TerminalStatus::Success,
                payload: Some(payload.clone()),
            },
            now,
        );
        let counters = monitor.counters();
        let result = monitor.into_state().into_result(counters).expect("success");
        assert_eq!(result, payload);
    }

    #[test]
    fn events_after_final_state_are_ignored() {
        let now = Instant::now();
        let mut monitor = ExecutionMonitor::new(stall_policy(), AcceptAny, now);
        for n in 1..=5 {
            monitor.consume_at(other_tool(n), now);
        }
        let aborted = monitor.state().clone();
        monitor.consume_at(other_tool(6), now);
        monitor.consume_at(
            ExecutionEvent::Terminal {
                status: TerminalStatus::Success,
                payload: Some(json!({})),
            },
            now,
        );
        assert_eq!(monitor.state(), &aborted);
        assert_eq!(monitor.counters().turn_count, 5);
    }

    #[test]
    fn soft_checkpoints_warn_once_without_transition() {
        let start = Instant::now();
        let policy = AbortPolicy::new(Duration::from_secs(600))
            .with_soft_checkpoints(vec![Duration::from_secs(60), Duration::from_secs(120)])
            .with_max_turns(5);
        let mut monitor = ExecutionMonitor::new(policy, AcceptAny, start);
        monitor.consume_at(ExecutionEvent::Started, start);
        for n in 1..=3 {
            monitor.consume_at(other_tool(n), start + Duration::from_secs(10));
        }
        assert!(monitor.drain_warnings().is_empty());

        monitor.consume_at(other_tool(4), start + Duration::from_secs(130));
        let warnings = monitor.drain_warnings();
        assert_eq!(warnings.len(), 3, "warnings: {warnings:?}");
        assert!(warnings.contains(&SoftWarning::Turns {
            turn_count: 4,
            max_turns: 5
        }));

        monitor.consume_at(other_tool(5), start + Duration::from_secs(140));
        assert!(monitor.drain_warnings().is_empty());
        assert_eq!(monitor.state(), &MonitorState::Running);
    }

    #[test]
    fn recent_tool_names_are_bounded() {
        let now = Instant::now();
        let mut policy = AbortPolicy::new(Duration::from_secs(60));
        policy.recent_tool_limit = 2;
        let mut monitor = ExecutionMonitor::new(policy, AcceptAny, now);
        for n in 1..=4 {
            monitor.consume_at(other_tool(n), now);
        }
        assert_eq!(
            monitor.counters().recent_tool_names,
            vec!["tool-3".to_string(), "tool-4".to_string()]
        );
    }
}
