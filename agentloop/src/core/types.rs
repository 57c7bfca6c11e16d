//! Run state and transcript types.
//!
//! `RunState` is the unit of persistence and concurrency control. Everything in
//! this module is plain data: serializable, cloneable, and free of I/O.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Non-terminal and re-entrant; the loop may step.
    Running,
    /// Suspended on an `ask_human` call until an answer is delivered.
    WaitingHumanInput,
    /// Absorbing; a final answer was produced.
    Complete,
    /// Suspended because the step budget ran out; resumable.
    MaxStepsReached,
    /// Oracle or store failure; resumable with the error cleared.
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::WaitingHumanInput => "waiting_human_input",
            RunStatus::Complete => "complete",
            RunStatus::MaxStepsReached => "max_steps_reached",
            RunStatus::Failed => "failed",
        }
    }

    /// Statuses in which `pending_calls` must be empty.
    pub fn requires_empty_pending(self) -> bool {
        matches!(
            self,
            RunStatus::Complete | RunStatus::MaxStepsReached | RunStatus::Failed
        )
    }

    /// True for statuses that an explicit resume may restart.
    pub fn is_resumable(self) -> bool {
        matches!(self, RunStatus::MaxStepsReached | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaker of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A tool call requested by the oracle and not yet resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// String argument by name; `None` when missing, non-string, or empty.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// One entry of the append-only transcript.
///
/// The tagged layout matches the item shapes the Responses API accepts as
/// input, so the transcript can be sent to the oracle unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    Message {
        role: Role,
        content: String,
    },
    FunctionCall {
        call_id: String,
        name: String,
        /// JSON-encoded argument object.
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        /// JSON-encoded output object.
        output: String,
    },
}

impl TranscriptEntry {
    pub fn user(content: impl Into<String>) -> Self {
        TranscriptEntry::Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        TranscriptEntry::Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Record of a call being dispatched.
    pub fn call(call: &ToolCall) -> Self {
        TranscriptEntry::FunctionCall {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            arguments: Value::Object(call.arguments.clone()).to_string(),
        }
    }

    /// Output of a user tool, wrapped as `{"result": ...}`.
    pub fn tool_output(call_id: impl Into<String>, result: Value) -> Self {
        TranscriptEntry::FunctionCallOutput {
            call_id: call_id.into(),
            output: serde_json::json!({ "result": result }).to_string(),
        }
    }

    /// Output of an `ask_human` call, wrapped as `{"answer": ...}`.
    pub fn human_answer(call_id: impl Into<String>, answer: &str) -> Self {
        TranscriptEntry::FunctionCallOutput {
            call_id: call_id.into(),
            output: serde_json::json!({ "answer": answer }).to_string(),
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            TranscriptEntry::Message { .. } => None,
            TranscriptEntry::FunctionCall { call_id, .. }
            | TranscriptEntry::FunctionCallOutput { call_id, .. } => Some(call_id),
        }
    }
}

/// Persisted record of one logical run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub id: String,
    /// Completed steps; never decreases.
    #[serde(default)]
    pub steps: u32,
    /// Number of saves the store has accepted; a save must carry the current
    /// value.
    #[serde(default)]
    pub revision: u64,
    pub status: RunStatus,
    #[serde(default)]
    pub transcript: Vec<TranscriptEntry>,
    #[serde(default)]
    pub pending_calls: Vec<ToolCall>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub final_answer: Option<String>,
}

impl RunState {
    /// Fresh run seeded with the user's prompt.
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: 0,
            revision: 0,
            status: RunStatus::Running,
            transcript: vec![TranscriptEntry::user(prompt)],
            pending_calls: Vec::new(),
            error: None,
            final_answer: None,
        }
    }

    /// Fresh run with a random UUID v4 identifier.
    pub fn launch(prompt: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), prompt)
    }

    /// Call id of the most recent `ask_human` call that has no output yet.
    pub fn unresolved_ask_human(&self) -> Option<&str> {
        self.transcript.iter().rev().find_map(|entry| match entry {
            TranscriptEntry::FunctionCall { call_id, name, .. }
                if name == crate::core::capability::ASK_HUMAN && !self.has_output(call_id) =>
            {
                Some(call_id.as_str())
            }
            _ => None,
        })
    }

    /// Question text of the most recent unresolved `ask_human` call.
    pub fn pending_question(&self) -> Option<String> {
        let call_id = self.unresolved_ask_human()?;
        self.transcript.iter().find_map(|entry| match entry {
            TranscriptEntry::FunctionCall {
                call_id: id,
                arguments,
                ..
            } if id == call_id => serde_json::from_str::<Value>(arguments)
                .ok()
                .and_then(|v| v.get("question").and_then(Value::as_str).map(str::to_string)),
            _ => None,
        })
    }

    fn has_output(&self, call_id: &str) -> bool {
        self.transcript.iter().any(|entry| {
            matches!(entry, TranscriptEntry::FunctionCallOutput { call_id: id, .. } if id == call_id)
        })
    }
}
