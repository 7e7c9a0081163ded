// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-session event stream.
//!
//! On connect the subscriber receives the buffered replay (up to 200
//! events, oldest first), then live events; the monotonic `sequence` field
//! lets the client tell the two apart.  Incoming client frames are ignored
//! by the core (reserved for future cancellation).  A failing send is fatal
//! to that connection only.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tracing::{debug, info};

use crate::AppState;

pub async fn session_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, session_id: String) {
    info!(session = %session_id, "stream subscriber connected");
    let (replay, mut live) = state.streams.subscribe(&session_id);
    for envelope in replay {
        if send_envelope(&mut socket, &envelope).await.is_err() {
            debug!(session = %session_id, "subscriber dropped during replay");
            return;
        }
    }
    loop {
        tokio::select! {
            envelope = live.recv() => {
                match envelope {
                    Some(envelope) => {
                        if send_envelope(&mut socket, &envelope).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Client frames are ignored; only closure matters.
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(session = %session_id, "websocket recv error: {err}");
                        break;
                    }
                }
            }
        }
    }
    info!(session = %session_id, "stream subscriber disconnected");
}

async fn send_envelope(
    socket: &mut WebSocket,
    envelope: &troupe_stream::Envelope,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(envelope).unwrap_or_default();
    socket.send(Message::Text(json)).await
}
