//! JSON-lines event decoding and file replay.
//!
//! One event per line:
//!
//! ```text
//! {"type":"started"}
//! {"type":"tool_invoked","name":"Task"}
//! {"type":"tool_invoked","name":"fetch_pr","kind":"fetch"}
//! {"type":"turn_completed","index":3}
//! {"type":"terminal","status":"success","payload":{}}
//! ```
//!
//! `kind` is optional and inferred from `name` when absent. Blank lines are
//! skipped.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::types::{ExecutionEvent, TerminalStatus, ToolKind};
use crate::driver::{EventStream, MonitoredTask};
use crate::error::{EventDecodeError, RunError};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Started,
    ToolInvoked {
        name: String,
        #[serde(default)]
        kind: Option<ToolKind>,
    },
    TurnCompleted {
        index: u32,
    },
    Terminal {
        status: String,
        #[serde(default)]
        payload: Option<Value>,
    },
}

impl From<WireEvent> for ExecutionEvent {
    fn from(wire: WireEvent) -> Self {
        match wire {
            WireEvent::Started => ExecutionEvent::Started,
            WireEvent::ToolInvoked { name, kind } => ExecutionEvent::ToolInvoked {
                kind: kind.unwrap_or_else(|| ToolKind::from_tool_name(&name)),
                name,
            },
            WireEvent::TurnCompleted { index } => ExecutionEvent::TurnCompleted { index },
            WireEvent::Terminal { status, payload } => ExecutionEvent::Terminal {
                status: TerminalStatus::parse(&status),
                payload,
            },
        }
    }
}

/// Decode one line. Returns `Ok(None)` for blank lines.
pub fn decode_line(line: &str, line_no: usize) -> Result<Option<ExecutionEvent>, EventDecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let wire: WireEvent =
        serde_json::from_str(trimmed).map_err(|source| EventDecodeError::Malformed {
            line: line_no,
            source,
        })?;
    Ok(Some(wire.into()))
}

/// Stream decoded events from `reader`, one per non-blank line.
pub fn read_events<R>(
    reader: R,
) -> impl Stream<Item = Result<ExecutionEvent, EventDecodeError>> + Send + 'static
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    stream::unfold(
        (reader.lines(), 0usize),
        |(mut lines, mut line_no)| async move {
            loop {
                line_no += 1;
                let item = match lines.next_line().await {
                    Ok(Some(line)) => match decode_line(&line, line_no) {
                        Ok(Some(event)) => Ok(event),
                        Ok(None) => continue,
                        Err(err) => Err(err),
                    },
                    Ok(None) => return None,
                    Err(err) => Err(EventDecodeError::Io(err)),
                };
                return Some((item, (lines, line_no)));
            }
        },
    )
}

/// Replays a recorded JSON-lines file as a task, re-reading it on every start.
#[derive(Debug, Clone)]
pub struct JsonlReplay {
    path: PathBuf,
}

impl JsonlReplay {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MonitoredTask for JsonlReplay {
    fn start(&self, cancel: CancellationToken) -> EventStream {
        let path = self.path.clone();
        debug!(path = %path.display(), "replaying events");
        stream::once(async move { tokio::fs::File::open(&path).await })
            .flat_map(|opened| match opened {
                Ok(file) => read_events(BufReader::new(file))
                    .map(|event| event.map_err(RunError::from))
                    .boxed(),
                Err(err) => stream::iter([Err(RunError::from(EventDecodeError::Io(err)))]).boxed(),
            })
            .take_until(cancel.cancelled_owned())
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_each_event_type() {
        assert_eq!(
            decode_line(r#"{"type":"started"}"#, 1).expect("decode"),
            Some(ExecutionEvent::Started)
        );
        assert_eq!(
            decode_line(r#"{"type":"tool_invoked","name":"Task"}"#, 1).expect("decode"),
            Some(ExecutionEvent::ToolInvoked {
                kind: ToolKind::Delegate,
                name: "Task".to_string()
            })
        );
        assert_eq!(
            decode_line(r#"{"type":"tool_invoked","name":"Task","kind":"other"}"#, 1)
                .expect("decode"),
            Some(ExecutionEvent::ToolInvoked {
                kind: ToolKind::Other,
                name: "Task".to_string()
            })
        );
        assert_eq!(
            decode_line(r#"{"type":"turn_completed","index":4}"#, 1).expect("decode"),
            Some(ExecutionEvent::TurnCompleted { index: 4 })
        );
        assert_eq!(
            decode_line(
                r#"{"type":"terminal","status":"error_max_turns"}"#,
                1
            )
            .expect("decode"),
            Some(ExecutionEvent::Terminal {
                status: TerminalStatus::MaxTurnsExhausted,
                payload: None
            })
        );
        assert_eq!(
            decode_line(
                r#"{"type":"terminal","status":"success","payload":{"a":1}}"#,
                1
            )
            .expect("decode"),
            Some(ExecutionEvent::Terminal {
                status: TerminalStatus::Success,
                payload: Some(json!({ "a": 1 }))
            })
        );
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert_eq!(decode_line("   ", 3).expect("decode"), None);
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let err = decode_line(r#"{"type":"teleported"}"#, 7).unwrap_err();
        assert!(matches!(err, EventDecodeError::Malformed { line: 7, .. }));
        assert!(err.to_string().starts_with("line 7:"));
    }

    #[tokio::test]
    async fn read_events_counts_physical_lines() {
        let input: &'static [u8] =
            b"{\"type\":\"started\"}\n\n{\"type\":\"turn_completed\",\"index\":1}\nnot json\n";
        let events: Vec<_> = read_events(input).collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].as_ref().expect("started"), &ExecutionEvent::Started);
        assert!(matches!(
            events[2],
            Err(EventDecodeError::Malformed { line: 4, .. })
        ));
    }

    #[tokio::test]
    async fn replay_missing_file_is_decode_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let replay = JsonlReplay::new(temp.path().join("missing.jsonl"));
        let events: Vec<_> = replay.start(CancellationToken::new()).collect().await;
        assert_eq!(events.len(), 1);
        let err = events.into_iter().next().expect("one item").unwrap_err();
        assert_eq!(err.as_label(), "event_decode_failed");
    }

    #[tokio::test]
    async fn replay_stops_when_cancelled() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("events.jsonl");
        std::fs::write(&path, "{\"type\":\"started\"}\n").expect("write");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let events: Vec<_> = JsonlReplay::new(&path).start(cancel).collect().await;
        assert!(events.is_empty());
    }
}
