//! Checkpoint store contract and the in-process implementation.
//!
//! A store holds the last published `RunState` for every run id. Saves replace
//! the whole state at once, so readers never observe a half-applied step.
//! Every save must carry the stored `revision`, and only the holder of a run's
//! claim may drive it, so two workers cannot interleave checkpoints.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use thiserror::Error;
use tracing::debug;

use crate::core::invariants::validate_invariants;
use crate::core::types::RunState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {0} not found")]
    NotFound(String),
    #[error("run {0} already exists")]
    AlreadyExists(String),
    #[error("conflicting save for run {id}: {reason}")]
    Conflict { id: String, reason: String },
    #[error("run {id} is claimed by another worker ({holder})")]
    Claimed { id: String, holder: String },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence for run checkpoints, keyed by run id.
pub trait CheckpointStore: Send + Sync {
    /// Register a new run. Fails if the id is taken.
    fn create(&self, state: &RunState) -> StoreResult<()>;
    fn load(&self, id: &str) -> StoreResult<RunState>;
    /// Replace the stored state of an existing run. `state.revision` must
    /// match the stored revision and is advanced on success.
    fn save(&self, state: &mut RunState) -> StoreResult<()>;
    /// Take the exclusive right to execute a run. Fails with
    /// [`StoreError::Claimed`] while another holder has it.
    fn claim(&self, id: &str) -> StoreResult<()>;
    /// Give up a claim taken by this store; other holders' claims are kept.
    fn release(&self, id: &str);
}

/// Reject saves from a stale copy, or that would move `steps` backwards or
/// break an invariant.
pub fn check_save(previous: Option<&RunState>, next: &RunState) -> StoreResult<()> {
    if let Some(prev) = previous.filter(|prev| next.revision != prev.revision) {
        return Err(StoreError::Conflict {
            id: next.id.clone(),
            reason: format!(
                "stale revision {} (stored revision is {})",
                next.revision, prev.revision
            ),
        });
    }
    if let Some(prev) = previous.filter(|prev| next.steps < prev.steps) {
        return Err(StoreError::Conflict {
            id: next.id.clone(),
            reason: format!("steps would decrease from {} to {}", prev.steps, next.steps),
        });
    }
    let errors = validate_invariants(next);
    if !errors.is_empty() {
        return Err(StoreError::Conflict {
            id: next.id.clone(),
            reason: errors.join("; "),
        });
    }
    Ok(())
}

/// In-memory store for tests and single-process embedding.
#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<String, RunState>>,
    claims: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryStore {
    fn create(&self, state: &RunState) -> StoreResult<()> {
        check_save(None, state)?;
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        if runs.contains_key(&state.id) {
            return Err(StoreError::AlreadyExists(state.id.clone()));
        }
        runs.insert(state.id.clone(), state.clone());
        debug!(run_id = %state.id, "created run");
        Ok(())
    }

    fn load(&self, id: &str) -> StoreResult<RunState> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        runs.get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn save(&self, state: &mut RunState) -> StoreResult<()> {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        let Some(previous) = runs.get(&state.id) else {
            return Err(StoreError::NotFound(state.id.clone()));
        };
        check_save(Some(previous), state)?;
        state.revision += 1;
        runs.insert(state.id.clone(), state.clone());
        debug!(
            run_id = %state.id,
            steps = state.steps,
            revision = state.revision,
            status = %state.status,
            "saved run"
        );
        Ok(())
    }

    fn claim(&self, id: &str) -> StoreResult<()> {
        let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        if !claims.insert(id.to_string()) {
            return Err(StoreError::Claimed {
                id: id.to_string(),
                holder: "another coordinator".to_string(),
            });
        }
        Ok(())
    }

    fn release(&self, id: &str) {
        self.claims
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }
}
