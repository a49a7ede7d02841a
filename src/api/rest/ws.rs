use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatch::snapshot;
use crate::models::driver::Role;
use crate::models::events::{ClientEvent, RegisterPayload, ServerEvent};
use crate::registry::{ConnId, ConnectionEntry};
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id: ConnId = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    state.push.attach(conn_id, tx);
    info!(conn = %conn_id, "socket connected");

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    // Who this connection announced itself as, once a register frame is in.
    let mut registered: Option<(Uuid, Role)> = None;

    while let Some(Ok(message)) = receiver.next().await {
        let Message::Text(text) = message else {
            continue;
        };

        match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => handle_client_event(&state, conn_id, event, &mut registered),
            Err(err) => {
                // one bad frame never takes down the loop
                warn!(conn = %conn_id, error = %err, "dropping malformed client frame");
                let _ = state.push.send(
                    conn_id,
                    &ServerEvent::RegistrationRejected {
                        reason: format!("malformed frame: {err}"),
                    },
                );
            }
        }
    }

    state.push.detach(conn_id);
    if let Some((actor_id, _)) = registered {
        // guarded by handle identity: a newer connection of the same actor
        // survives this disconnect
        if state.registry.unregister(actor_id, conn_id) {
            info!(conn = %conn_id, actor_id = %actor_id, "actor unregistered");
        }
    }
    snapshot::publish(&state);

    send_task.abort();
    info!(conn = %conn_id, "socket disconnected");
}

fn handle_client_event(
    state: &AppState,
    conn_id: ConnId,
    event: ClientEvent,
    registered: &mut Option<(Uuid, Role)>,
) {
    match event {
        ClientEvent::Register(payload) => handle_register(state, conn_id, payload, registered),
        ClientEvent::UpdateLocation(location) => {
            if let Some((actor_id, _)) = registered {
                state.registry.update_location(*actor_id, location.into());
            }
        }
        ClientEvent::Heartbeat => {
            if let Some((actor_id, _)) = registered {
                state.registry.heartbeat(*actor_id, Utc::now());
                snapshot::publish(state);
            }
        }
    }
}

fn handle_register(
    state: &AppState,
    conn_id: ConnId,
    payload: RegisterPayload,
    registered: &mut Option<(Uuid, Role)>,
) {
    let entry = match payload.role {
        Role::Driver => {
            // The registry mirrors the durable record, not the client's
            // claims; an unknown driver id cannot register at all.
            let Some(record) = state.store.get_driver(payload.id) else {
                warn!(conn = %conn_id, driver_id = %payload.id, "register from unknown driver");
                let _ = state.push.send(
                    conn_id,
                    &ServerEvent::RegistrationRejected {
                        reason: "unknown driver".to_string(),
                    },
                );
                return;
            };

            ConnectionEntry {
                actor_id: record.id,
                conn: conn_id,
                role: Role::Driver,
                name: record.name.clone(),
                vehicle_type: record.vehicle_type,
                is_on_duty: record.is_on_duty,
                is_approved: record.is_approved,
                approval_status: record.approval_status,
                location: None,
                last_heartbeat: Utc::now(),
            }
        }
        role => ConnectionEntry {
            actor_id: payload.id,
            conn: conn_id,
            role,
            name: payload.name.clone(),
            vehicle_type: None,
            is_on_duty: false,
            is_approved: false,
            approval_status: crate::models::driver::ApprovalStatus::Pending,
            location: None,
            last_heartbeat: Utc::now(),
        },
    };

    if payload.role == Role::Admin {
        state.push.mark_admin(conn_id);
    }

    let actor_id = entry.actor_id;
    state.registry.register(entry);
    *registered = Some((actor_id, payload.role));

    info!(conn = %conn_id, actor_id = %actor_id, role = ?payload.role, "actor registered");
    snapshot::publish(state);
}
