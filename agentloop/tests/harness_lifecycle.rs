//! End-to-end run lifecycle scenarios driven through the coordinator.
//!
//! Each test scripts the oracle, starts a run, waits for the worker to stop,
//! and checks the published checkpoint.

use std::sync::Arc;

use agentloop::coordinator::RunCoordinator;
use agentloop::core::invariants::validate_invariants;
use agentloop::core::types::{RunState, RunStatus, TranscriptEntry};
use agentloop::io::file_store::FileStore;
use agentloop::io::store::{CheckpointStore, MemoryStore};
use agentloop::test_support::{ScriptedOracle, call, reply};
use agentloop::tools::math::math_registry;
use serde_json::json;

fn coordinator(oracle: Arc<ScriptedOracle>, max_steps: u32) -> RunCoordinator {
    coordinator_with_store(Arc::new(MemoryStore::new()), oracle, max_steps)
}

fn coordinator_with_store(
    store: Arc<dyn CheckpointStore>,
    oracle: Arc<ScriptedOracle>,
    max_steps: u32,
) -> RunCoordinator {
    RunCoordinator::new(
        store,
        oracle,
        Arc::new(math_registry().expect("registry")),
        max_steps,
    )
}

fn assert_valid(state: &RunState) {
    let errors = validate_invariants(state);
    assert!(errors.is_empty(), "invariant violations: {errors:?}");
}

/// "What is 2+2?": sum, then final answer, in two steps.
#[test]
fn two_plus_two_completes_in_two_steps() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        reply(vec![call("c1", "sum_numbers", json!({"a": 2, "b": 2}))]),
        reply(vec![call("c2", "final_answer", json!({"answer": "4"}))]),
    ]));
    let coordinator = coordinator(oracle.clone(), 10);

    let done = coordinator
        .launch("What is 2+2?")
        .expect("launch")
        .handle
        .wait()
        .expect("wait");

    assert_eq!(done.status, RunStatus::Complete);
    assert_eq!(done.final_answer.as_deref(), Some("4"));
    assert_eq!(done.steps, 2);
    assert!(done.pending_calls.is_empty());
    assert_eq!(done.transcript[0], TranscriptEntry::user("What is 2+2?"));
    assert_eq!(
        done.transcript[2],
        TranscriptEntry::tool_output("c1", json!(4.0))
    );
    assert_eq!(oracle.consultations(), 2);
    assert_valid(&done);
}

/// Ask-human on step 1 suspends; the answer restarts with a fresh allowance.
#[test]
fn ask_human_suspends_and_answer_resumes_with_fresh_budget() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        reply(vec![call(
            "q1",
            "ask_human",
            json!({"question": "Which equation should I solve?"}),
        )]),
        reply(vec![call("c1", "subtract_numbers", json!({"a": 5, "b": 2}))]),
        reply(vec![call("c2", "sum_numbers", json!({"a": 0, "b": 3}))]),
        reply(vec![call("c3", "final_answer", json!({"answer": "x = 3"}))]),
    ]));
    let coordinator = coordinator(oracle.clone(), 2);

    let waiting = coordinator
        .launch("Solve the equation for me")
        .expect("launch")
        .handle
        .wait()
        .expect("wait");

    assert_eq!(waiting.status, RunStatus::WaitingHumanInput);
    assert_eq!(waiting.steps, 1);
    assert!(waiting.pending_calls.is_empty());
    assert!(matches!(
        waiting.transcript.last(),
        Some(TranscriptEntry::FunctionCall { call_id, name, .. })
            if call_id == "q1" && name == "ask_human"
    ));
    assert_eq!(
        waiting.pending_question().as_deref(),
        Some("Which equation should I solve?")
    );

    let resumed = coordinator
        .provide_input(&waiting.id, "x + 2 = 5")
        .expect("provide input");
    assert_eq!(resumed.state.status, RunStatus::Running);
    assert_eq!(
        resumed.state.transcript.last(),
        Some(&TranscriptEntry::human_answer("q1", "x + 2 = 5"))
    );
    let stopped = resumed.handle.wait().expect("wait");

    // Fresh allowance of two steps from steps = 1.
    assert_eq!(stopped.status, RunStatus::MaxStepsReached);
    assert_eq!(stopped.steps, 3);
    assert_valid(&stopped);

    let seen = oracle.transcripts();
    assert_eq!(
        seen[1].last(),
        Some(&TranscriptEntry::human_answer("q1", "x + 2 = 5"))
    );

    let done = coordinator
        .resume(&stopped.id)
        .expect("resume")
        .handle
        .wait()
        .expect("wait");
    assert_eq!(done.status, RunStatus::Complete);
    assert_eq!(done.steps, 4);
    assert_eq!(done.final_answer.as_deref(), Some("x = 3"));
}

#[test]
fn single_step_budget_stops_and_resumes_one_step_at_a_time() {
    let oracle = Arc::new(ScriptedOracle::repeating(
        "multiply_numbers",
        json!({"a": 2, "b": 3}),
        5,
    ));
    let coordinator = coordinator(oracle, 1);

    let first = coordinator
        .launch("keep multiplying")
        .expect("launch")
        .handle
        .wait()
        .expect("wait");
    assert_eq!(first.status, RunStatus::MaxStepsReached);
    assert_eq!(first.steps, 1);
    assert!(first.pending_calls.is_empty());

    let second = coordinator
        .resume(&first.id)
        .expect("resume")
        .handle
        .wait()
        .expect("wait");
    assert_eq!(second.status, RunStatus::MaxStepsReached);
    assert_eq!(second.steps, 2);
    assert!(second.transcript.len() > first.transcript.len());
    assert!(second.transcript.starts_with(&first.transcript));
}

#[test]
fn tool_failure_is_recorded_without_changing_status() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        reply(vec![call("c1", "divide_numbers", json!({"a": 10, "b": 0}))]),
        reply(vec![call(
            "c2",
            "final_answer",
            json!({"answer": "Division by zero is undefined"}),
        )]),
    ]));
    let coordinator = coordinator(oracle, 10);

    let done = coordinator
        .launch("What is 10 / 0?")
        .expect("launch")
        .handle
        .wait()
        .expect("wait");

    assert_eq!(done.status, RunStatus::Complete);
    assert_eq!(done.error, None);
    assert!(
        done.transcript
            .contains(&TranscriptEntry::tool_output("c1", json!("Error: Division by zero")))
    );
}

#[test]
fn oracle_failure_fails_run_and_resume_recovers() {
    let oracle = Arc::new(ScriptedOracle::with_results(vec![
        Ok(reply(vec![call("c1", "sum_numbers", json!({"a": 2, "b": 2}))])),
        Err("upstream timed out".to_string()),
        Ok(reply(vec![call("c2", "final_answer", json!({"answer": "4"}))])),
    ]));
    let coordinator = coordinator(oracle, 10);

    let failed = coordinator
        .launch("What is 2+2?")
        .expect("launch")
        .handle
        .wait()
        .expect("wait");
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.steps, 1);
    assert!(failed.pending_calls.is_empty());
    assert!(
        failed
            .error
            .as_deref()
            .is_some_and(|e| e.contains("upstream timed out"))
    );
    assert_valid(&failed);

    let done = coordinator
        .resume(&failed.id)
        .expect("resume")
        .handle
        .wait()
        .expect("wait");
    assert_eq!(done.status, RunStatus::Complete);
    assert_eq!(done.steps, 2);
    assert_eq!(done.error, None);
    assert_eq!(done.final_answer.as_deref(), Some("4"));
}

/// Checkpoints written by one coordinator are picked up by another sharing
/// the same directory.
#[test]
fn file_store_carries_runs_across_coordinators() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first_oracle = Arc::new(ScriptedOracle::new(vec![reply(vec![call(
        "q1",
        "ask_human",
        json!({"question": "Which number?"}),
    )])]));
    let first = coordinator_with_store(Arc::new(FileStore::new(dir.path())), first_oracle, 5);
    let waiting = first
        .launch("Square a number")
        .expect("launch")
        .handle
        .wait()
        .expect("wait");
    assert!(dir.path().join(format!("{}.json", waiting.id)).exists());
    drop(first);

    let second_oracle = Arc::new(ScriptedOracle::new(vec![
        reply(vec![call("c1", "power", json!({"base": 7, "exponent": 2}))]),
        reply(vec![call("c2", "final_answer", json!({"answer": "49"}))]),
    ]));
    let second = coordinator_with_store(Arc::new(FileStore::new(dir.path())), second_oracle, 5);
    assert_eq!(second.get_state(&waiting.id).expect("state"), waiting);

    let done = second
        .provide_input(&waiting.id, "7")
        .expect("provide input")
        .handle
        .wait()
        .expect("wait");
    assert_eq!(done.status, RunStatus::Complete);
    assert_eq!(done.steps, 3);
    assert_eq!(done.final_answer.as_deref(), Some("49"));
}

/// A run left `running` on disk (worker died mid-run) can be recovered.
#[test]
fn orphaned_running_run_is_recovered() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FileStore::new(dir.path()));
    let mut orphan = RunState::new("orphan-1", "What is 3*3?");
    store.create(&orphan).expect("create");
    orphan.steps = 1;
    orphan
        .pending_calls
        .push(call("c1", "multiply_numbers", json!({"a": 3, "b": 3})));
    store.save(&mut orphan).expect("save");

    let oracle = Arc::new(ScriptedOracle::new(vec![reply(vec![call(
        "c2",
        "final_answer",
        json!({"answer": "9"}),
    )])]));
    let coordinator = coordinator_with_store(store, oracle.clone(), 5);

    let done = coordinator
        .recover("orphan-1")
        .expect("recover")
        .handle
        .wait()
        .expect("wait");

    assert_eq!(done.status, RunStatus::Complete);
    assert_eq!(done.steps, 2);
    // The leftover call was drained before the oracle saw the transcript.
    assert_eq!(
        oracle.transcripts()[0].last(),
        Some(&TranscriptEntry::tool_output("c1", json!(9.0)))
    );
}
