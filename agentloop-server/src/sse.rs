//! Server-Sent Events stream of run checkpoints.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::state::{AppState, CheckpointEvent};

#[derive(Debug, Serialize, PartialEq, Eq)]
struct SsePayload<'a> {
    #[serde(rename = "type")]
    event_type: &'static str,
    run_id: &'a str,
    steps: u32,
    status: &'static str,
}

impl<'a> From<&'a CheckpointEvent> for SsePayload<'a> {
    fn from(event: &'a CheckpointEvent) -> Self {
        SsePayload {
            event_type: "checkpoint",
            run_id: &event.run_id,
            steps: event.steps,
            status: event.status.as_str(),
        }
    }
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(checkpoint) => {
                    if let Ok(json) = serde_json::to_string(&SsePayload::from(&checkpoint)) {
                        yield Ok(Event::default().event("checkpoint").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some checkpoints dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
