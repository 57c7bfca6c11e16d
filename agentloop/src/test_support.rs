//! Test-only oracles and builders.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};

use crate::core::types::{ToolCall, TranscriptEntry};
use crate::oracle::{Oracle, OracleReply};
use crate::tools::ToolSchema;

/// Build a tool call from a JSON object of arguments.
pub fn call(call_id: &str, name: &str, arguments: Value) -> ToolCall {
    let arguments = match arguments {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ToolCall {
        call_id: call_id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

/// Reply carrying only tool calls.
pub fn reply(tool_calls: Vec<ToolCall>) -> OracleReply {
    OracleReply {
        messages: Vec::new(),
        tool_calls,
    }
}

/// Oracle that replays queued replies in order and records what it was shown.
///
/// Once the queue is empty every further consultation fails.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<OracleReply, String>>>,
    seen: Mutex<Vec<Vec<TranscriptEntry>>>,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<OracleReply>) -> Self {
        Self::with_results(replies.into_iter().map(Ok).collect())
    }

    /// Replies where `Err(msg)` makes that consultation fail with `msg`.
    pub fn with_results(replies: Vec<Result<OracleReply, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Oracle whose first consultation fails.
    pub fn failing(message: &str) -> Self {
        Self::with_results(vec![Err(message.to_string())])
    }

    /// Oracle that requests the same tool call forever, with fresh call ids.
    pub fn repeating(name: &str, arguments: Value, times: usize) -> Self {
        Self::new(
            (0..times)
                .map(|i| reply(vec![call(&format!("call-{i}"), name, arguments.clone())]))
                .collect(),
        )
    }

    pub fn consultations(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Transcripts passed to each consultation, in order.
    pub fn transcripts(&self) -> Vec<Vec<TranscriptEntry>> {
        self.seen.lock().unwrap().clone()
    }
}

impl Oracle for ScriptedOracle {
    fn consult(&self, transcript: &[TranscriptEntry], _tools: &[ToolSchema]) -> Result<OracleReply> {
        self.seen.lock().unwrap().push(transcript.to_vec());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted oracle exhausted")),
        }
    }
}

/// Oracle that blocks every consultation until [`GatedOracle::open`] is called,
/// then delegates to an inner scripted oracle.
pub struct GatedOracle {
    inner: ScriptedOracle,
    gate: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Default)]
struct GateState {
    open: bool,
    entered: usize,
}

impl GatedOracle {
    pub fn new(inner: ScriptedOracle) -> Self {
        Self {
            inner,
            gate: Mutex::new(GateState::default()),
            changed: Condvar::new(),
        }
    }

    pub fn open(&self) {
        self.gate.lock().unwrap().open = true;
        self.changed.notify_all();
    }

    /// Block until at least `n` consultations have started (or time out).
    pub fn wait_until_entered(&self, n: usize) -> bool {
        let guard = self.gate.lock().unwrap();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, Duration::from_secs(5), |g| g.entered < n)
            .unwrap();
        guard.entered >= n
    }

    pub fn inner(&self) -> &ScriptedOracle {
        &self.inner
    }
}

impl Oracle for GatedOracle {
    fn consult(&self, transcript: &[TranscriptEntry], tools: &[ToolSchema]) -> Result<OracleReply> {
        {
            let mut guard = self.gate.lock().unwrap();
            guard.entered += 1;
            self.changed.notify_all();
            let _open = self
                .changed
                .wait_while(guard, |g| !g.open)
                .unwrap();
        }
        self.inner.consult(transcript, tools)
    }
}
