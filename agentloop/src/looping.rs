//! Multi-step run loop with a checkpoint after every step.

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::budget::{exhausted, max_steps_allowed};
use crate::core::types::{RunState, RunStatus};
use crate::oracle::Oracle;
use crate::step::run_step;
use crate::tools::ToolRegistry;

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// A final answer was produced.
    Complete,
    /// An `ask_human` call suspended the run.
    WaitingHumanInput,
    /// The step allowance for this invocation ran out.
    MaxStepsReached { steps: u32, allowed: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub run_id: String,
    pub started_at_step: u32,
    pub steps_executed: u32,
    pub stop: LoopStop,
}

/// Drive `state` until it completes, suspends, or exhausts `max_steps` more
/// steps.
///
/// `checkpoint` is called after every step and once more when the budget runs
/// out. Step or checkpoint errors stop the loop immediately and are returned;
/// `state` may then hold a partial step.
#[instrument(skip_all, fields(run_id = %state.id, max_steps = max_steps))]
pub fn run_loop<O, F>(
    state: &mut RunState,
    oracle: &O,
    registry: &ToolRegistry,
    max_steps: u32,
    mut checkpoint: F,
) -> Result<LoopOutcome>
where
    O: Oracle + ?Sized,
    F: FnMut(&mut RunState) -> Result<()>,
{
    state.status = RunStatus::Running;
    state.error = None;

    let started_at_step = state.steps;
    let allowed = max_steps_allowed(max_steps, started_at_step);
    info!(steps = started_at_step, allowed, "run loop started");

    while state.status == RunStatus::Running && !exhausted(state.steps, allowed) {
        run_step(state, oracle, registry)?;
        checkpoint(&mut *state).context("checkpoint after step")?;
    }

    let stop = match state.status {
        RunStatus::Complete => LoopStop::Complete,
        RunStatus::WaitingHumanInput => LoopStop::WaitingHumanInput,
        _ => {
            state.status = RunStatus::MaxStepsReached;
            state.pending_calls.clear();
            checkpoint(&mut *state).context("checkpoint at step limit")?;
            LoopStop::MaxStepsReached {
                steps: state.steps,
                allowed,
            }
        }
    };

    info!(steps = state.steps, status = %state.status, "run loop stopped");
    Ok(LoopOutcome {
        run_id: state.id.clone(),
        started_at_step,
        steps_executed: state.steps - started_at_step,
        stop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedOracle, call, reply};
    use crate::tools::math::math_registry;
    use serde_json::json;

    fn noisy_oracle(n: usize) -> ScriptedOracle {
        ScriptedOracle::new(
            (0..n)
                .map(|i| {
                    reply(vec![call(
                        &format!("c{i}"),
                        "sum_numbers",
                        json!({"a": i, "b": 1}),
                    )])
                })
                .collect(),
        )
    }

    #[test]
    fn stops_at_budget_and_checkpoints_every_step() {
        let registry = math_registry().expect("registry");
        let oracle = noisy_oracle(3);
        let mut state = RunState::new("r", "count");
        let mut checkpoints = Vec::new();

        let outcome = run_loop(&mut state, &oracle, &registry, 3, |s| {
            checkpoints.push((s.steps, s.status));
            Ok(())
        })
        .expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::MaxStepsReached {
                steps: 3,
                allowed: 3
            }
        );
        assert_eq!(outcome.steps_executed, 3);
        assert_eq!(state.status, RunStatus::MaxStepsReached);
        assert_eq!(
            checkpoints,
            vec![
                (1, RunStatus::Running),
                (2, RunStatus::Running),
                (3, RunStatus::Running),
                (3, RunStatus::MaxStepsReached),
            ]
        );
    }

    #[test]
    fn resume_grants_a_fresh_allowance() {
        let registry = math_registry().expect("registry");
        let oracle = noisy_oracle(5);
        let mut state = RunState::new("r", "count");

        run_loop(&mut state, &oracle, &registry, 2, |_| Ok(())).expect("first");
        assert_eq!(state.steps, 2);

        let outcome = run_loop(&mut state, &oracle, &registry, 2, |_| Ok(())).expect("second");
        assert_eq!(outcome.started_at_step, 2);
        assert_eq!(state.steps, 4);
        assert_eq!(state.status, RunStatus::MaxStepsReached);
    }

    #[test]
    fn restart_clears_previous_error() {
        let registry = math_registry().expect("registry");
        let oracle = ScriptedOracle::new(vec![reply(vec![call(
            "f",
            "final_answer",
            json!({"answer": "ok"}),
        )])]);
        let mut state = RunState::new("r", "p");
        state.status = RunStatus::Failed;
        state.error = Some("earlier".to_string());

        let outcome = run_loop(&mut state, &oracle, &registry, 5, |_| Ok(())).expect("loop");

        assert_eq!(outcome.stop, LoopStop::Complete);
        assert_eq!(state.error, None);
        assert_eq!(state.final_answer.as_deref(), Some("ok"));
    }

    #[test]
    fn checkpoint_errors_stop_the_loop() {
        let registry = math_registry().expect("registry");
        let oracle = noisy_oracle(3);
        let mut state = RunState::new("r", "p");

        let err = run_loop(&mut state, &oracle, &registry, 3, |_| {
            Err(anyhow::anyhow!("disk full"))
        })
        .unwrap_err();

        assert!(format!("{err:#}").contains("disk full"));
        assert_eq!(oracle.consultations(), 1);
    }
}
