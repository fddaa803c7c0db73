//! Shared deterministic types for the execution monitor.
//!
//! These types define the contract between a monitored task and the monitor.
//! They carry no I/O and must stay deterministic across runs.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a tool invocation, used by the abort heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Pulls data from an external system (e.g. a pull request API).
    Fetch,
    /// Hands work to a subagent.
    Delegate,
    /// Reads or searches local material.
    Inspect,
    Other,
}

impl ToolKind {
    /// Classify a tool by the name the agent used to invoke it.
    ///
    /// - `Task` spawns a subagent.
    /// - `mcp__<server>__<tool>` tools fetch from external servers, except
    ///   linters which only inspect local files.
    /// - `Read`, `Grep`, `Glob` inspect the workspace.
    pub fn from_tool_name(name: &str) -> Self {
        match name {
            "Task" => ToolKind::Delegate,
            "Read" | "Grep" | "Glob" => ToolKind::Inspect,
            _ if name.starts_with("mcp__") => {
                if name.ends_with("__lint") {
                    ToolKind::Inspect
                } else {
                    ToolKind::Fetch
                }
            }
            _ => ToolKind::Other,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ToolKind::Fetch => "fetch",
            ToolKind::Delegate => "delegate",
            ToolKind::Inspect => "inspect",
            ToolKind::Other => "other",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Terminal status reported by the monitored task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Success,
    /// The task ran out of turns before producing a result.
    MaxTurnsExhausted,
    /// Any status the monitor does not recognize, kept verbatim.
    Other(String),
}

impl TerminalStatus {
    /// Parse a status string as emitted on the wire.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "success" => TerminalStatus::Success,
            "max_turns_exhausted" | "error_max_turns" => TerminalStatus::MaxTurnsExhausted,
            other => TerminalStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TerminalStatus::Success => "success",
            TerminalStatus::MaxTurnsExhausted => "max_turns_exhausted",
            TerminalStatus::Other(raw) => raw,
        }
    }
}

/// One progress event from an in-flight task.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    Started,
    ToolInvoked { kind: ToolKind, name: String },
    TurnCompleted { index: u32 },
    Terminal {
        status: TerminalStatus,
        payload: Option<Value>,
    },
}

impl ExecutionEvent {
    /// Build a tool event, classifying the kind from the tool name.
    pub fn tool(name: impl Into<String>) -> Self {
        let name = name.into();
        ExecutionEvent::ToolInvoked {
            kind: ToolKind::from_tool_name(&name),
            name,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionEvent::Started => "started",
            ExecutionEvent::ToolInvoked { .. } => "tool_invoked",
            ExecutionEvent::TurnCompleted { .. } => "turn_completed",
            ExecutionEvent::Terminal { .. } => "terminal",
        }
    }
}

/// Point-in-time copy of the monitor counters, attached to failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    pub turn_count: u32,
    pub per_kind_counts: BTreeMap<ToolKind, u32>,
    pub recent_tool_names: Vec<String>,
}

impl CountersSnapshot {
    pub fn count(&self, kind: ToolKind) -> u32 {
        self.per_kind_counts.get(&kind).copied().unwrap_or(0)
    }
}

impl fmt::Display for CountersSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "elapsed={}ms turns={}",
            self.elapsed.as_millis(),
            self.turn_count
        )?;
        for (kind, count) in &self.per_kind_counts {
            write!(f, " {kind}={count}")?;
        }
        if !self.recent_tool_names.is_empty() {
            write!(f, " recent=[{}]", self.recent_tool_names.join(","))?;
        }
        Ok(())
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_tool_names_from_orchestrator() {
        assert_eq!(ToolKind::from_tool_name("Task"), ToolKind::Delegate);
        assert_eq!(
            ToolKind::from_tool_name("mcp__github__get_pull_request"),
            ToolKind::Fetch
        );
        assert_eq!(
            ToolKind::from_tool_name("mcp__github__list_pull_request_files"),
            ToolKind::Fetch
        );
        assert_eq!(
            ToolKind::from_tool_name("mcp__eslint__lint"),
            ToolKind::Inspect
        );
        assert_eq!(ToolKind::from_tool_name("Grep"), ToolKind::Inspect);
        assert_eq!(ToolKind::from_tool_name("Skill"), ToolKind::Other);
    }

    #[test]
    fn terminal_status_keeps_unknown_verbatim() {
        assert_eq!(TerminalStatus::parse("success"), TerminalStatus::Success);
        assert_eq!(
            TerminalStatus::parse("error_max_turns"),
            TerminalStatus::MaxTurnsExhausted
        );
        let other = TerminalStatus::parse("error_during_execution");
        assert_eq!(other.as_str(), "error_during_execution");
    }

    #[test]
    fn snapshot_display_lists_kinds_in_order() {
        let mut snapshot = CountersSnapshot {
            elapsed: Duration::from_millis(1500),
            turn_count: 4,
            ..CountersSnapshot::default()
        };
        snapshot.per_kind_counts.insert(ToolKind::Other, 3);
        snapshot.per_kind_counts.insert(ToolKind::Fetch, 1);
        assert_eq!(
            snapshot.to_string(),
            "elapsed=1500ms turns=4 fetch=1 other=3"
        );
    }
}
