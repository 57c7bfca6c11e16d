//! Run state invariants checked before every checkpoint is accepted.

use std::collections::HashSet;

use crate::core::types::{RunState, RunStatus, TranscriptEntry};

/// Check the run state invariants:
/// - `pending_calls` empty unless `running`
/// - `final_answer` present iff `complete`
/// - `error` present only when `failed`
/// - each call id recorded at most once, and outputs follow their call
pub fn validate_invariants(state: &RunState) -> Vec<String> {
    let mut errors = Vec::new();

    if state.status != RunStatus::Running && !state.pending_calls.is_empty() {
        errors.push(format!(
            "{}: {} pending call(s) with status {}",
            state.id,
            state.pending_calls.len(),
            state.status
        ));
    }

    match (state.status, &state.final_answer) {
        (RunStatus::Complete, None) => {
            errors.push(format!("{}: complete without final_answer", state.id));
        }
        (status, Some(_)) if status != RunStatus::Complete => {
            errors.push(format!("{}: final_answer set with status {}", state.id, status));
        }
        _ => {}
    }

    if state.error.is_some() && state.status != RunStatus::Failed {
        errors.push(format!(
            "{}: error set with status {}",
            state.id, state.status
        ));
    }

    check_call_order(state, &mut errors);
    errors
}

fn check_call_order(state: &RunState, errors: &mut Vec<String>) {
    let mut called = HashSet::new();
    let mut answered = HashSet::new();
    for (idx, entry) in state.transcript.iter().enumerate() {
        match entry {
            TranscriptEntry::FunctionCall { call_id, .. } => {
                if !called.insert(call_id.as_str()) {
                    errors.push(format!(
                        "{}: duplicate call id '{}' at entry {}",
                        state.id, call_id, idx
                    ));
                }
            }
            TranscriptEntry::FunctionCallOutput { call_id, .. } => {
                if !called.contains(call_id.as_str()) {
                    errors.push(format!(
                        "{}: output for '{}' at entry {} precedes its call",
                        state.id, call_id, idx
                    ));
                }
                if !answered.insert(call_id.as_str()) {
                    errors.push(format!(
                        "{}: duplicate output for '{}' at entry {}",
                        state.id, call_id, idx
                    ));
                }
            }
            TranscriptEntry::Message { .. } => {}
        }
    }
}
