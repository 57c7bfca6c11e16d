//! Shared application state for the HTTP server.

use std::sync::Arc;

use agentloop::coordinator::RunCoordinator;
use agentloop::core::types::{RunState, RunStatus};
use tokio::sync::broadcast;

/// Broadcast to SSE clients whenever a run publishes a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEvent {
    pub run_id: String,
    pub steps: u32,
    pub status: RunStatus,
}

impl From<&RunState> for CheckpointEvent {
    fn from(state: &RunState) -> Self {
        Self {
            run_id: state.id.clone(),
            steps: state.steps,
            status: state.status,
        }
    }
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: RunCoordinator,
    /// Checkpoint events fed by a coordinator observer.
    pub event_tx: Arc<broadcast::Sender<CheckpointEvent>>,
}

impl AppState {
    pub fn new(coordinator: RunCoordinator) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        let observer_tx = event_tx.clone();
        coordinator.add_observer(Arc::new(move |state: &RunState| {
            // No subscribers is not an error.
            let _ = observer_tx.send(CheckpointEvent::from(state));
        }));
        Self {
            coordinator,
            event_tx: Arc::new(event_tx),
        }
    }
}
