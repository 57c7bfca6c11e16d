//! Single-flight run coordination over a checkpoint store.
//!
//! The coordinator is the only writer of the store while a run executes. Every
//! start path (launch, resume, human input, recover) first claims the run id in
//! the executing set, then works on an owned copy of the state on a dedicated
//! worker thread, publishing a checkpoint after every step. The claim is held
//! by an RAII guard that the worker drops on every exit path, panics included.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::core::types::{RunState, RunStatus, TranscriptEntry};
use crate::io::store::{CheckpointStore, StoreError};
use crate::looping::run_loop;
use crate::oracle::Oracle;
use crate::tools::{ToolRegistry, panic_message};

/// Rejected coordinator request. No state is mutated when one is returned.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("run {0} not found")]
    NotFound(String),
    #[error("run {0} is already executing")]
    Conflict(String),
    #[error("run {id} is {status}: {reason}")]
    InvalidState {
        id: String,
        status: RunStatus,
        reason: String,
    },
    #[error("spawn worker for run {id}: {source}")]
    Spawn {
        id: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => CoordinatorError::NotFound(id),
            StoreError::Claimed { id, .. } => CoordinatorError::Conflict(id),
            other => CoordinatorError::Store(other),
        }
    }
}

/// Called with every published checkpoint.
pub type CheckpointObserver = Arc<dyn Fn(&RunState) + Send + Sync>;

/// Join handle for one execution of a run.
pub struct RunHandle {
    run_id: String,
    join: JoinHandle<RunState>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Block until the execution ends and return the state it published last.
    pub fn wait(self) -> Result<RunState> {
        self.join
            .join()
            .map_err(|_| anyhow!("worker for run {} panicked", self.run_id))
    }
}

/// A started execution: the state as published at start, plus its handle.
pub struct StartedRun {
    pub state: RunState,
    pub handle: RunHandle,
}

/// Shared coordinator; clones refer to the same executing set.
#[derive(Clone)]
pub struct RunCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CheckpointStore>,
    oracle: Arc<dyn Oracle>,
    registry: Arc<ToolRegistry>,
    max_steps: u32,
    executing: Mutex<HashSet<String>>,
    observers: RwLock<Vec<CheckpointObserver>>,
}

/// Claim on a run id, in this coordinator and in the store; releases both
/// when dropped.
struct ExecutionGuard {
    inner: Arc<Inner>,
    id: String,
    claimed: bool,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if self.claimed {
            self.inner.store.release(&self.id);
        }
        self.inner
            .executing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
        debug!(run_id = %self.id, "released run");
    }
}

impl RunCoordinator {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        oracle: Arc<dyn Oracle>,
        registry: Arc<ToolRegistry>,
        max_steps: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                oracle,
                registry,
                max_steps,
                executing: Mutex::new(HashSet::new()),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn add_observer(&self, observer: CheckpointObserver) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    pub fn max_steps(&self) -> u32 {
        self.inner.max_steps
    }

    /// Create a run for `prompt` and start executing it.
    pub fn launch(&self, prompt: &str) -> Result<StartedRun, CoordinatorError> {
        let state = RunState::launch(prompt);
        self.inner.store.create(&state)?;
        let guard = self.acquire(&state.id)?;
        info!(run_id = %state.id, "launched run");
        self.start(guard, state)
    }

    /// Last published state of a run.
    pub fn get_state(&self, id: &str) -> Result<RunState, CoordinatorError> {
        Ok(self.inner.store.load(id)?)
    }

    pub fn is_executing(&self, id: &str) -> bool {
        self.inner
            .executing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }

    /// Restart a run that stopped at its step limit or failed.
    pub fn resume(&self, id: &str) -> Result<StartedRun, CoordinatorError> {
        let guard = self.acquire(id)?;
        let mut state = self.inner.store.load(id)?;
        if !state.status.is_resumable() {
            let reason = match state.status {
                RunStatus::WaitingHumanInput => "provide input instead",
                RunStatus::Complete => "a complete run cannot be resumed",
                _ => "run is already running",
            };
            return Err(self.reject(&state, reason));
        }
        state.status = RunStatus::Running;
        state.error = None;
        self.inner.store.save(&mut state)?;
        info!(run_id = %id, steps = state.steps, "resuming run");
        self.start(guard, state)
    }

    /// Answer the pending `ask_human` call of a suspended run and continue it.
    pub fn provide_input(&self, id: &str, answer: &str) -> Result<StartedRun, CoordinatorError> {
        let guard = self.acquire(id)?;
        let mut state = self.inner.store.load(id)?;
        if state.status != RunStatus::WaitingHumanInput {
            return Err(self.reject(&state, "run is not waiting for human input"));
        }
        let Some(call_id) = state.unresolved_ask_human().map(str::to_string) else {
            return Err(self.reject(&state, "no unresolved ask_human call in transcript"));
        };
        state
            .transcript
            .push(TranscriptEntry::human_answer(call_id, answer));
        state.status = RunStatus::Running;
        self.inner.store.save(&mut state)?;
        info!(run_id = %id, steps = state.steps, "human input delivered");
        self.start(guard, state)
    }

    /// Restart a run persisted as `running` that no worker owns, e.g. after
    /// the process that was executing it died.
    pub fn recover(&self, id: &str) -> Result<StartedRun, CoordinatorError> {
        let guard = self.acquire(id)?;
        let state = self.inner.store.load(id)?;
        if state.status != RunStatus::Running {
            return Err(self.reject(&state, "only running runs can be recovered"));
        }
        info!(run_id = %id, steps = state.steps, "recovering orphaned run");
        self.start(guard, state)
    }

    fn acquire(&self, id: &str) -> Result<ExecutionGuard, CoordinatorError> {
        {
            let mut executing = self
                .inner
                .executing
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if !executing.insert(id.to_string()) {
                warn!(run_id = %id, "rejected start: run already executing");
                return Err(CoordinatorError::Conflict(id.to_string()));
            }
        }
        let mut guard = ExecutionGuard {
            inner: Arc::clone(&self.inner),
            id: id.to_string(),
            claimed: false,
        };
        // Another process may be executing the run from the same store.
        if let Err(err) = self.inner.store.claim(id) {
            warn!(run_id = %id, error = %err, "rejected start: run claimed elsewhere");
            return Err(err.into());
        }
        guard.claimed = true;
        debug!(run_id = %id, "claimed run");
        Ok(guard)
    }

    fn reject(&self, state: &RunState, reason: &str) -> CoordinatorError {
        warn!(run_id = %state.id, status = %state.status, reason, "rejected start");
        CoordinatorError::InvalidState {
            id: state.id.clone(),
            status: state.status,
            reason: reason.to_string(),
        }
    }

    fn start(&self, guard: ExecutionGuard, state: RunState) -> Result<StartedRun, CoordinatorError> {
        let id = state.id.clone();
        let working = state.clone();
        let inner = Arc::clone(&self.inner);
        let join = thread::Builder::new()
            .name(format!("run-{}", &id[..id.len().min(8)]))
            .spawn(move || {
                let _guard = guard;
                inner.execute(working)
            })
            .map_err(|source| CoordinatorError::Spawn {
                id: id.clone(),
                source,
            })?;
        Ok(StartedRun {
            state,
            handle: RunHandle { run_id: id, join },
        })
    }
}

impl Inner {
    /// Run the loop on an owned copy, publishing after every step. On failure
    /// the partial step is discarded and the last published state is marked
    /// `failed`.
    fn execute(&self, mut working: RunState) -> RunState {
        let mut last_published = working.clone();
        let result = catch_unwind(AssertUnwindSafe(|| {
            run_loop(
                &mut working,
                self.oracle.as_ref(),
                &self.registry,
                self.max_steps,
                |state| {
                    self.store.save(state)?;
                    last_published = state.clone();
                    self.notify(state);
                    Ok(())
                },
            )
        }))
        .unwrap_or_else(|payload| Err(anyhow!("worker panicked: {}", panic_message(&*payload))));

        match result {
            Ok(outcome) => {
                info!(
                    run_id = %outcome.run_id,
                    steps = working.steps,
                    executed = outcome.steps_executed,
                    status = %working.status,
                    "run stopped"
                );
                working
            }
            Err(err) => {
                let mut failed = last_published;
                failed.status = RunStatus::Failed;
                failed.error = Some(format!("{err:#}"));
                failed.pending_calls.clear();
                error!(run_id = %failed.id, steps = failed.steps, error = %err, "run failed");
                if let Err(save_err) = self.store.save(&mut failed) {
                    error!(run_id = %failed.id, error = %save_err, "could not record failure");
                }
                self.notify(&failed);
                failed
            }
        }
    }

    fn notify(&self, state: &RunState) {
        let observers = self.observers.read().unwrap_or_else(|e| e.into_inner());
        for observer in observers.iter() {
            observer(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::MemoryStore;
    use crate::test_support::{ScriptedOracle, call, reply};
    use crate::tools::math::math_registry;
    use serde_json::json;

    fn coordinator(oracle: ScriptedOracle, max_steps: u32) -> (RunCoordinator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let coordinator = RunCoordinator::new(
            store.clone(),
            Arc::new(oracle),
            Arc::new(math_registry().expect("registry")),
            max_steps,
        );
        (coordinator, store)
    }

    #[test]
    fn launch_runs_to_completion_and_releases_claim() {
        let oracle = ScriptedOracle::new(vec![
            reply(vec![call("c1", "sum_numbers", json!({"a": 2, "b": 2}))]),
            reply(vec![call("c2", "final_answer", json!({"answer": "4"}))]),
        ]);
        let (coordinator, _) = coordinator(oracle, 10);

        let started = coordinator.launch("2+2").expect("launch");
        assert_eq!(started.state.status, RunStatus::Running);
        let id = started.handle.run_id().to_string();
        let finished = started.handle.wait().expect("wait");

        assert_eq!(finished.status, RunStatus::Complete);
        assert_eq!(coordinator.get_state(&id).expect("state"), finished);
        assert!(!coordinator.is_executing(&id));
    }

    #[test]
    fn oracle_failure_marks_run_failed_at_last_checkpoint() {
        let oracle = ScriptedOracle::with_results(vec![
            Ok(reply(vec![call("c1", "sum_numbers", json!({"a": 1, "b": 1}))])),
            Err("503 upstream".to_string()),
        ]);
        let (coordinator, _) = coordinator(oracle, 10);

        let started = coordinator.launch("p").expect("launch");
        let failed = started.handle.wait().expect("wait");

        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.steps, 1);
        assert!(failed.pending_calls.is_empty());
        assert!(failed.error.as_deref().unwrap_or_default().contains("503 upstream"));
        assert_eq!(coordinator.get_state(&failed.id).expect("state"), failed);
    }

    #[test]
    fn resume_rejections_leave_state_untouched() {
        let oracle = ScriptedOracle::new(vec![reply(vec![call(
            "c1",
            "final_answer",
            json!({"answer": "done"}),
        )])]);
        let (coordinator, _) = coordinator(oracle, 10);
        let id = coordinator
            .launch("p")
            .expect("launch")
            .handle
            .wait()
            .expect("wait")
            .id;
        let before = coordinator.get_state(&id).expect("state");

        let err = coordinator.resume(&id).err().expect("complete is absorbing");
        assert!(matches!(
            err,
            CoordinatorError::InvalidState {
                status: RunStatus::Complete,
                ..
            }
        ));
        let err = coordinator.provide_input(&id, "hi").err().expect("not waiting");
        assert!(matches!(err, CoordinatorError::InvalidState { .. }));
        let err = coordinator.recover(&id).err().expect("not running");
        assert!(matches!(err, CoordinatorError::InvalidState { .. }));

        assert!(matches!(
            coordinator.resume("missing"),
            Err(CoordinatorError::NotFound(_))
        ));
        assert_eq!(coordinator.get_state(&id).expect("state"), before);
        assert!(!coordinator.is_executing(&id));
    }

    #[test]
    fn observers_see_every_checkpoint() {
        let oracle = ScriptedOracle::repeating("sum_numbers", json!({"a": 1, "b": 1}), 3);
        let (coordinator, _) = coordinator(oracle, 3);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        coordinator.add_observer(Arc::new(move |state: &RunState| {
            sink.lock().unwrap().push((state.steps, state.status));
        }));

        coordinator
            .launch("p")
            .expect("launch")
            .handle
            .wait()
            .expect("wait");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (1, RunStatus::Running),
                (2, RunStatus::Running),
                (3, RunStatus::Running),
                (3, RunStatus::MaxStepsReached),
            ]
        );
    }

    struct PanickingOracle;

    impl Oracle for PanickingOracle {
        fn consult(
            &self,
            _transcript: &[TranscriptEntry],
            _tools: &[crate::tools::ToolSchema],
        ) -> Result<crate::oracle::OracleReply> {
            panic!("oracle bug");
        }
    }

    #[test]
    fn worker_panic_is_recorded_as_failure() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = RunCoordinator::new(
            store,
            Arc::new(PanickingOracle),
            Arc::new(ToolRegistry::new()),
            5,
        );

        let started = coordinator.launch("p").expect("launch");
        let id = started.state.id.clone();
        let failed = started.handle.wait().expect("wait");

        assert_eq!(failed.status, RunStatus::Failed);
        assert!(failed.error.as_deref().unwrap_or_default().contains("oracle bug"));
        assert!(!coordinator.is_executing(&id));
    }
}
