// WebSocket transport adapter for match event streaming.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};

use super::{json_error, AppState};
use crate::auth::OptionalAuthAgent;
use crate::match_actor::{MatchHandle, Subscription};

/// WebSocket upgrade handler. An authenticated participant gets `your_turn`
/// filtering and disconnect tracking; everyone else spectates.
pub async fn ws_match(
    ws: WebSocketUpgrade,
    OptionalAuthAgent(auth): OptionalAuthAgent,
    State(state): State<AppState>,
    Path(match_id): Path<String>,
) -> impl IntoResponse {
    let Some(handle) = state.registry.get(&match_id) else {
        return json_error(StatusCode::NOT_FOUND, "not_found", "match not found")
            .into_response();
    };
    let agent_id = auth.map(|a| a.agent.id);
    let Ok(subscription) = handle.subscribe(agent_id.clone()).await else {
        return json_error(StatusCode::NOT_FOUND, "not_found", "match not found")
            .into_response();
    };
    ws.on_upgrade(move |socket| handle_ws(socket, handle, subscription, agent_id))
        .into_response()
}

async fn handle_ws(
    mut socket: WebSocket,
    handle: MatchHandle,
    mut subscription: Subscription,
    agent_id: Option<String>,
) {
    if let Some(agent) = &agent_id {
        handle.connection_opened(agent);
    }

    // Forward subscription events as JSON frames until the stream ends or
    // the client goes away.
    loop {
        tokio::select! {
            event = subscription.next() => {
                match event {
                    Some(ev) => {
                        let frame = match serde_json::to_string(&ev) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::error!("Failed to serialize stream event: {e}");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(frame.into())).await.is_err() {
                            // Client disconnected
                            break;
                        }
                    }
                    None => {
                        // Stream over (match ended or subscriber dropped).
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {
                        // Clients only listen on this socket.
                    }
                }
            }
        }
    }

    if let Some(agent) = &agent_id {
        handle.connection_closed(agent);
    }
}
