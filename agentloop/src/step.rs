//! One step of the agent loop: drain pending calls, consult the oracle, drain
//! what it asked for.

use std::collections::HashSet;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

use crate::core::capability::Capability;
use crate::core::types::{RunState, RunStatus, ToolCall, TranscriptEntry};
use crate::oracle::Oracle;
use crate::tools::{ToolRegistry, ToolSchema};

/// Summary of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Value of `steps` after this step.
    pub step: u32,
    /// Whether the oracle was consulted.
    pub consulted: bool,
    /// User tool calls executed during the step.
    pub tools_executed: usize,
    /// Status after the step.
    pub status: RunStatus,
}

enum Drain {
    /// Every pending call was resolved.
    Resolved,
    /// A reserved capability suspended or completed the run.
    Halted,
}

/// Advance `state` by exactly one step.
///
/// Pending calls left by an interrupted step are drained first. If that does
/// not halt the run, the oracle is consulted and the calls it requests are
/// drained before the step ends. User tool failures become output entries;
/// oracle failures are returned to the caller with `state` partially updated,
/// so callers must discard it and fall back to their last checkpoint.
#[instrument(skip_all, fields(run_id = %state.id, step = state.steps + 1))]
pub fn run_step<O: Oracle + ?Sized>(
    state: &mut RunState,
    oracle: &O,
    registry: &ToolRegistry,
) -> Result<StepOutcome> {
    state.steps += 1;
    let mut outcome = StepOutcome {
        step: state.steps,
        consulted: false,
        tools_executed: 0,
        status: state.status,
    };

    if let Drain::Halted = drain_pending(state, registry, &mut outcome.tools_executed) {
        outcome.status = state.status;
        return Ok(outcome);
    }

    let schemas = registry.schemas();
    consult(state, oracle, &schemas)?;
    outcome.consulted = true;

    drain_pending(state, registry, &mut outcome.tools_executed);
    outcome.status = state.status;
    debug!(
        status = %state.status,
        tools = outcome.tools_executed,
        transcript = state.transcript.len(),
        "step finished"
    );
    Ok(outcome)
}

/// Ask the oracle for the next move and queue the calls it requests.
fn consult<O: Oracle + ?Sized>(
    state: &mut RunState,
    oracle: &O,
    schemas: &[ToolSchema],
) -> Result<()> {
    let reply = oracle
        .consult(&state.transcript, schemas)
        .context("consult oracle")?;
    check_call_ids(state, &reply.tool_calls)?;
    debug!(
        messages = reply.messages.len(),
        tool_calls = reply.tool_calls.len(),
        "oracle replied"
    );
    state
        .transcript
        .extend(reply.messages.into_iter().map(TranscriptEntry::assistant));
    state.pending_calls.extend(reply.tool_calls);
    Ok(())
}

/// Call ids key outputs to calls, so a reply may not reuse one already in
/// the transcript or repeat one within itself.
fn check_call_ids(state: &RunState, calls: &[ToolCall]) -> Result<()> {
    let mut seen: HashSet<&str> = state
        .transcript
        .iter()
        .filter_map(TranscriptEntry::call_id)
        .collect();
    for call in calls {
        if !seen.insert(&call.call_id) {
            bail!(
                "oracle reused call id '{}' for '{}'",
                call.call_id,
                call.name
            );
        }
    }
    Ok(())
}

/// Resolve pending calls in order until the queue is empty or a reserved
/// capability halts the run. Remaining calls are abandoned on halt.
fn drain_pending(state: &mut RunState, registry: &ToolRegistry, executed: &mut usize) -> Drain {
    while !state.pending_calls.is_empty() {
        let call: ToolCall = state.pending_calls.remove(0);
        state.transcript.push(TranscriptEntry::call(&call));

        match Capability::resolve(&call.name) {
            Capability::AskHuman => {
                state.pending_calls.clear();
                state.status = RunStatus::WaitingHumanInput;
                info!(call_id = %call.call_id, "waiting for human input");
                return Drain::Halted;
            }
            Capability::FinalAnswer => {
                state.pending_calls.clear();
                state.status = RunStatus::Complete;
                // Set once; a blank answer is stored as "" so `complete` always carries one.
                if state.final_answer.is_none() {
                    state.final_answer = Some(call.str_arg("answer").unwrap_or_default().to_string());
                }
                info!("run complete");
                return Drain::Halted;
            }
            Capability::UserTool(name) => {
                let result = registry.invoke(&name, &call.arguments);
                state
                    .transcript
                    .push(TranscriptEntry::tool_output(&call.call_id, result));
                *executed += 1;
            }
        }
    }
    Drain::Resolved
}
