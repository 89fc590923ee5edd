//! SSE progress streaming

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::Result;
use crate::processing::JobEvent;
use crate::server::state::AppState;

/// GET /api/jobs/:id/events - Stream job progress as server-sent events
///
/// The first event is a snapshot of the current state; subsequent events
/// follow the job's progress. The stream ends when the job's channel is
/// dropped after it reaches a terminal state.
pub async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let job = state.queue().get(id)?;
    let receiver = state.subscribe(id);

    let snapshot = JobEvent::from_job(&job);
    let initial = stream::once(async move { Ok(to_sse_event(&snapshot)) });
    let updates = BroadcastStream::new(receiver)
        .filter_map(|event| async move { event.ok().map(|e| Ok(to_sse_event(&e))) });

    Ok(Sse::new(initial.chain(updates)).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &JobEvent) -> Event {
    match Event::default().json_data(event) {
        Ok(sse) => sse,
        Err(e) => {
            tracing::warn!("Failed to encode progress event: {}", e);
            Event::default().data("{}")
        }
    }
}
