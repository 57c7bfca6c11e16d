//! Stable exit codes for `agentloop` CLI commands.

use crate::core::types::RunStatus;

/// Command succeeded; for run commands, the run is complete.
pub const OK: i32 = 0;
/// Invalid input, config, or state transition, or any other error.
pub const INVALID: i32 = 1;
/// The run is suspended on an `ask_human` call.
pub const WAITING: i32 = 2;
/// The run stopped at its step limit and can be resumed.
pub const MAX_STEPS: i32 = 3;
/// The run failed and can be resumed.
pub const FAILED: i32 = 4;
/// Another worker is executing the run.
pub const CONFLICT: i32 = 5;

/// Exit code reporting where a run stopped.
pub fn for_status(status: RunStatus) -> i32 {
    match status {
        RunStatus::Complete => OK,
        RunStatus::WaitingHumanInput => WAITING,
        RunStatus::MaxStepsReached => MAX_STEPS,
        RunStatus::Failed => FAILED,
        RunStatus::Running => INVALID,
    }
}
