//! WebSocket endpoint streaming backup events.
//!
//! Clients receive every [`BackupEvent`] as tagged JSON, optionally filtered
//! to one entity with `?entity=<id>`. Clients may send commands to cancel a
//! backup or ask for a status snapshot.

use crate::api::AppState;
use crate::events::BackupEvent;
use crate::manager::BackupManager;
use crate::models::BackupJob;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Only forward events for this entity
    #[serde(default)]
    pub entity: Option<String>,
}

/// Commands accepted from a connected client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsCommand {
    #[serde(rename = "backup:cancel")]
    CancelBackup {
        #[serde(rename = "entityId")]
        entity_id: String,
    },

    #[serde(rename = "backup:status")]
    GetStatus {
        #[serde(rename = "entityId")]
        entity_id: String,
    },
}

/// Direct replies to a command, sent only to the requesting client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsReply {
    #[serde(rename = "backup:cancel:response")]
    Cancelled {
        #[serde(rename = "entityId")]
        entity_id: String,
        cancelled: bool,
    },

    #[serde(rename = "backup:status:response")]
    Status {
        #[serde(rename = "entityId")]
        entity_id: String,
        #[serde(rename = "inProgress")]
        in_progress: bool,
        job: Option<BackupJob>,
    },
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    let events = app_state.events.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, events, app_state.manager, params.entity))
}

/// Execute a client command against the manager.
pub fn handle_command(manager: &BackupManager, command: WsCommand) -> WsReply {
    match command {
        WsCommand::CancelBackup { entity_id } => {
            info!(entity_id = %entity_id, "Cancel requested over WebSocket");
            let cancelled = manager.cancel_backup(&entity_id);
            WsReply::Cancelled { entity_id, cancelled }
        }
        WsCommand::GetStatus { entity_id } => WsReply::Status {
            in_progress: manager.is_backup_in_progress(&entity_id),
            job: manager.get_backup_status(&entity_id),
            entity_id,
        },
    }
}

/// Handle a WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    mut events: broadcast::Receiver<BackupEvent>,
    manager: BackupManager,
    entity_filter: Option<String>,
) {
    info!("New WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<WsReply>();

    // Forward broadcast events and command replies to this client
    let mut send_task = tokio::spawn(async move {
        loop {
            let json = tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        if entity_filter.as_deref().is_some_and(|id| id != event.entity_id()) {
                            continue;
                        }
                        serde_json::to_string(&event)
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("WebSocket client lagging, dropped {} event(s)", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => serde_json::to_string(&reply),
                    None => break,
                },
            };

            match json {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize event: {:?}", e);
                }
            }
        }
    });

    // Handle incoming commands from client
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                match serde_json::from_str::<WsCommand>(&text) {
                    Ok(command) => {
                        debug!("WebSocket command: {:?}", command);
                        if reply_tx.send(handle_command(&manager, command)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse WebSocket command: {:?}", e);
                    }
                }
            }
        }
    });

    // Wait for either task to finish (connection closed or error)
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("WebSocket client disconnected");
}
