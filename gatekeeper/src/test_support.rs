//! Test-only helpers: scripted tasks and event builders.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::types::{ExecutionEvent, TerminalStatus};
use crate::driver::{EventStream, MonitoredTask};
use crate::error::RunError;

pub type ScriptedEvent = Result<ExecutionEvent, RunError>;

/// Task that replays one predefined script per `start` call.
///
/// Once the scripts run out, further starts produce an empty stream.
pub struct ScriptedTask {
    scripts: Mutex<VecDeque<Vec<ScriptedEvent>>>,
    tokens: Mutex<Vec<CancellationToken>>,
    event_delay: Option<Duration>,
    hang_after_script: bool,
}

impl ScriptedTask {
    pub fn new(scripts: Vec<Vec<ScriptedEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            tokens: Mutex::new(Vec::new()),
            event_delay: None,
            hang_after_script: false,
        }
    }

    /// Sleep before emitting each event.
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }

    /// Keep the stream open after the last scripted event until cancelled.
    pub fn hanging(mut self) -> Self {
        self.hang_after_script = true;
        self
    }

    /// Number of times the task was started.
    pub fn starts(&self) -> usize {
        self.tokens.lock().expect("tokens lock").len()
    }

    pub fn all_cancelled(&self) -> bool {
        self.tokens
            .lock()
            .expect("tokens lock")
            .iter()
            .all(CancellationToken::is_cancelled)
    }
}

impl MonitoredTask for ScriptedTask {
    fn start(&self, cancel: CancellationToken) -> EventStream {
        self.tokens.lock().expect("tokens lock").push(cancel.clone());
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or_default();

        let delay = self.event_delay;
        let events = stream::iter(script).then(move |event| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            event
        });
        if self.hang_after_script {
            let until_cancelled = stream::once(async move {
                cancel.cancelled().await;
            })
            .filter_map(|()| async { None::<ScriptedEvent> });
            events.chain(until_cancelled).boxed()
        } else {
            events.boxed()
        }
    }
}

/// Classified tool event.
pub fn tool(name: &str) -> ScriptedEvent {
    Ok(ExecutionEvent::tool(name))
}

pub fn success(payload: Value) -> ScriptedEvent {
    Ok(ExecutionEvent::Terminal {
        status: TerminalStatus::Success,
        payload: Some(payload),
    })
}

pub fn terminal(status: &str) -> ScriptedEvent {
    Ok(ExecutionEvent::Terminal {
        status: TerminalStatus::parse(status),
        payload: None,
    })
}

pub fn task_error(message: &str) -> ScriptedEvent {
    Err(RunError::Task {
        message: message.to_string(),
    })
}

/// Minimal payload accepted by the review-report schema.
pub fn review_report() -> Value {
    serde_json::json!({
        "pullRequest": { "owner": "octocat", "repo": "Hello-World", "number": 1 },
        "fileReviews": [],
        "summary": { "filesReviewed": 0, "totalIssues": 0 },
        "recommendations": []
    })
}
