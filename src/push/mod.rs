use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::AppError;
use crate::models::events::ServerEvent;
use crate::registry::ConnId;

/// Delivery side of the transport. The registry decides *who* is reachable;
/// this decides *how* a frame gets to a connection. Implementations must not
/// block: a slow consumer cannot be allowed to stall a dispatch fan-out.
pub trait PushChannel: Send + Sync {
    fn attach(&self, conn: ConnId, tx: mpsc::UnboundedSender<String>);
    fn detach(&self, conn: ConnId);
    fn mark_admin(&self, conn: ConnId);
    fn send(&self, conn: ConnId, event: &ServerEvent) -> Result<(), AppError>;
    fn broadcast_admins(&self, event: &ServerEvent);
    fn connected_count(&self) -> usize;
}

/// WebSocket-backed channel: one unbounded queue per connection, drained by
/// that connection's writer task. Sending is a queue push and never suspends.
#[derive(Default)]
pub struct WsPushChannel {
    senders: DashMap<ConnId, mpsc::UnboundedSender<String>>,
    admins: DashSet<ConnId>,
}

impl WsPushChannel {
    pub fn new() -> Self {
        Self {
            senders: DashMap::new(),
            admins: DashSet::new(),
        }
    }
}

fn encode(event: &ServerEvent) -> Result<String, AppError> {
    serde_json::to_string(event)
        .map_err(|err| AppError::Internal(format!("failed to encode event: {err}")))
}

impl PushChannel for WsPushChannel {
    fn attach(&self, conn: ConnId, tx: mpsc::UnboundedSender<String>) {
        self.senders.insert(conn, tx);
    }

    fn detach(&self, conn: ConnId) {
        self.senders.remove(&conn);
        self.admins.remove(&conn);
    }

    fn mark_admin(&self, conn: ConnId) {
        self.admins.insert(conn);
    }

    fn send(&self, conn: ConnId, event: &ServerEvent) -> Result<(), AppError> {
        let frame = encode(event)?;
        let sender = self
            .senders
            .get(&conn)
            .ok_or_else(|| AppError::ChannelUnavailable(format!("connection {conn} is gone")))?;

        sender
            .send(frame)
            .map_err(|_| AppError::ChannelUnavailable(format!("connection {conn} closed")))
    }

    fn broadcast_admins(&self, event: &ServerEvent) {
        let frame = match encode(event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "failed to encode admin broadcast");
                return;
            }
        };

        for conn in self.admins.iter() {
            if let Some(sender) = self.senders.get(conn.key()) {
                let _ = sender.send(frame.clone());
            }
        }
    }

    fn connected_count(&self) -> usize {
        self.senders.len()
    }
}
