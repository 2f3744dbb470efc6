//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! Each connection serves exactly one participant of one session: the first
//! message must be `Join`, which registers an outbound channel with the hub;
//! an outbound pump task drains that channel into the socket while the
//! inbound loop dispatches commands to the session coordinator.

use crate::web::{
    protocol::{CheckpointView, ClientMessage, ServerMessage},
    state::AppState,
};
use crate::live::LiveError;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use checkpoint_core::domain::Role;
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    // --- 1. Join Phase ---
    let (session_id, participant_id, role) = match receiver.next().await {
        Some(Ok(Message::Text(join_json))) => {
            match serde_json::from_str::<ClientMessage>(&join_json) {
                Ok(ClientMessage::Join { session_id, participant_id, role }) => {
                    (session_id, participant_id, role)
                }
                _ => {
                    warn!("First message was not a valid Join message.");
                    send_direct(
                        &ws_sender,
                        &ServerMessage::Error {
                            message: "First message must be a join".to_string(),
                            retryable: false,
                        },
                    )
                    .await;
                    return;
                }
            }
        }
        _ => {
            info!("Client disconnected before sending Join message.");
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    if let Err(e) = app_state.coordinator.join(session_id, participant_id, role, tx) {
        warn!("Join rejected for {} on session {}: {}", participant_id, session_id, e);
        send_direct(&ws_sender, &reject_message(&e)).await;
        return;
    }
    info!(
        "Participant {} joined session {} as {:?}",
        participant_id, session_id, role
    );

    // --- 2. Outbound Pump ---
    let pump = {
        let ws_sender = ws_sender.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if !send_direct(&ws_sender, &msg).await {
                    break;
                }
            }
        })
    };

    send_direct(&ws_sender, &ServerMessage::Joined { session_id }).await;
    // Joining clients are immediately synced, so a reconnect or late join
    // catches up without having observed the original broadcasts.
    send_sync(&app_state, session_id, &ws_sender).await;

    // --- 3. Main Message Loop ---
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                handle_text_message(
                    text.to_string(),
                    &app_state,
                    session_id,
                    participant_id,
                    role,
                    &ws_sender,
                )
                .await;
            }
            Message::Close(_) => {
                info!("Client sent close message.");
                break;
            }
            _ => {}
        }
    }

    // --- 4. Cleanup ---
    app_state.coordinator.leave(session_id, participant_id);
    pump.abort();
    info!("Participant {} left session {}", participant_id, session_id);
}

/// Dispatches one parsed client command to the coordinator and writes the
/// reply (if any) back on this connection. Hub fan-out happens inside the
/// coordinator; everything sent here is addressed to the caller alone.
async fn handle_text_message(
    text: String,
    app_state: &AppState,
    session_id: Uuid,
    participant_id: Uuid,
    role: Role,
    ws_sender: &WsSender,
) {
    let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            return;
        }
    };

    match client_msg {
        ClientMessage::Join { .. } => {
            warn!("Received subsequent Join message, which is ignored.");
        }

        ClientMessage::Sync => {
            send_sync(app_state, session_id, ws_sender).await;
        }

        ClientMessage::SetPage { page } => {
            if !require_presenter(role, ws_sender).await {
                return;
            }
            if let Err(e) = app_state.coordinator.set_page(session_id, page) {
                send_direct(ws_sender, &reject_message(&e)).await;
            }
        }

        ClientMessage::ActivateCheckpoint { checkpoint_id } => {
            if !require_presenter(role, ws_sender).await {
                return;
            }
            match app_state
                .coordinator
                .activate_checkpoint(session_id, checkpoint_id)
                .await
            {
                // The presenter's own view of the running checkpoint; the
                // viewer announcement went out through the hub.
                Ok(_) => send_sync(app_state, session_id, ws_sender).await,
                Err(e) => {
                    warn!("Activate rejected for session {}: {}", session_id, e);
                    send_direct(ws_sender, &reject_message(&e)).await;
                }
            }
        }

        ClientMessage::StopCheckpoint => {
            if !require_presenter(role, ws_sender).await {
                return;
            }
            if let Err(e) = app_state.coordinator.stop_checkpoint(session_id) {
                send_direct(ws_sender, &reject_message(&e)).await;
            }
        }

        ClientMessage::SubmitResponse { checkpoint_id, chosen } => {
            match app_state
                .coordinator
                .submit_response(session_id, checkpoint_id, participant_id, chosen)
                .await
            {
                Ok(_) => {
                    send_direct(ws_sender, &ServerMessage::ResponseAccepted { checkpoint_id })
                        .await;
                }
                // The window closed first: the client shows "time's up".
                Err(LiveError::NoActiveCheckpoint(_)) => {
                    send_direct(ws_sender, &ServerMessage::SubmissionClosed { checkpoint_id })
                        .await;
                }
                Err(e) => {
                    send_direct(ws_sender, &reject_message(&e)).await;
                }
            }
        }

        ClientMessage::EndSession => {
            if !require_presenter(role, ws_sender).await {
                return;
            }
            if let Err(e) = app_state.coordinator.end_session(session_id).await {
                error!("Failed to end session {}: {}", session_id, e);
                send_direct(ws_sender, &reject_message(&e)).await;
            }
        }
    }
}

/// Sends the caller the current session state (page, active checkpoint,
/// absolute deadline).
async fn send_sync(app_state: &AppState, session_id: Uuid, ws_sender: &WsSender) {
    match app_state.coordinator.sync(session_id) {
        Ok(state) => {
            let message = ServerMessage::SessionSync {
                page: state.page,
                checkpoint: state.checkpoint.as_ref().map(CheckpointView::from_checkpoint),
                deadline: state.deadline,
            };
            send_direct(ws_sender, &message).await;
        }
        Err(e) => {
            send_direct(ws_sender, &reject_message(&e)).await;
        }
    }
}

async fn require_presenter(role: Role, ws_sender: &WsSender) -> bool {
    if role == Role::Teacher {
        return true;
    }
    send_direct(ws_sender, &reject_message(&LiveError::Forbidden)).await;
    false
}

/// Writes one message on this connection. Returns false when the socket is
/// gone, which ends the outbound pump.
async fn send_direct(ws_sender: &WsSender, message: &ServerMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return true;
        }
    };
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .is_ok()
}

/// Maps a live-path error to the client-facing error message. Persist
/// failures are the one retryable case: the live tally already moved on and
/// the overwrite semantics make a resubmission safe.
fn reject_message(error: &LiveError) -> ServerMessage {
    ServerMessage::Error {
        message: error.to_string(),
        retryable: matches!(error, LiveError::Port(_)),
    }
}
