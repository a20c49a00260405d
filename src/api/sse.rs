// SSE transport adapter for match event streaming.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
};
use futures::stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::{json_error, AppState};
use crate::auth::OptionalAuthAgent;
use crate::match_actor::MatchHandle;

/// Drops back to `connection_closed` when the SSE stream is torn down,
/// so the disconnect timer starts counting.
struct ConnectionGuard {
    handle: MatchHandle,
    agent_id: Option<String>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(agent) = &self.agent_id {
            self.handle.connection_closed(agent);
        }
    }
}

/// SSE handler carrying the same envelope as the WebSocket transport,
/// one `event:`/`data:` pair per stream event.
pub async fn stream_match(
    OptionalAuthAgent(auth): OptionalAuthAgent,
    State(state): State<AppState>,
    Path(match_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, axum::response::Response> {
    let Some(handle) = state.registry.get(&match_id) else {
        return Err(
            json_error(StatusCode::NOT_FOUND, "not_found", "match not found").into_response(),
        );
    };
    let agent_id = auth.map(|a| a.agent.id);
    let subscription = handle
        .subscribe(agent_id.clone())
        .await
        .map_err(|_| {
            json_error(StatusCode::NOT_FOUND, "not_found", "match not found").into_response()
        })?;

    if let Some(agent) = &agent_id {
        handle.connection_opened(agent);
    }
    let guard = ConnectionGuard { handle, agent_id };

    let stream = ReceiverStream::new(subscription.into_receiver()).map(move |ev| {
        let _held = &guard;
        let event = Event::default().event(ev.name());
        Ok(match event.json_data(&ev) {
            Ok(e) => e,
            Err(e) => {
                tracing::error!("Failed to serialize stream event: {e}");
                Event::default().event("error").data("serialization failure")
            }
        })
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
