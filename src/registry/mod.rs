use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::models::driver::{ApprovalStatus, GeoPoint, Role, VehicleType};

/// Identity of a single transport connection. A reconnect gets a new id.
pub type ConnId = Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionEntry {
    pub actor_id: Uuid,
    pub conn: ConnId,
    pub role: Role,
    pub name: String,
    pub vehicle_type: Option<VehicleType>,
    pub is_on_duty: bool,
    pub is_approved: bool,
    pub approval_status: ApprovalStatus,
    pub location: Option<GeoPoint>,
    pub last_heartbeat: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    pub vehicle_type: Option<Option<VehicleType>>,
    pub is_on_duty: Option<bool>,
    pub is_approved: Option<bool>,
    pub approval_status: Option<ApprovalStatus>,
}

/// In-memory table of currently-reachable actors. Entry presence means
/// "reachable", never "eligible"; dispatch decisions cross-check the durable
/// store. The table is lost on restart and rebuilt from reconnects, which is
/// intentional: reachability is transient state.
///
/// Every operation is a single map call, so each mutation is atomic with
/// respect to concurrent readers and writers.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: DashMap<Uuid, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert or overwrite the entry for an actor. Last writer wins: if the
    /// same actor opens a second connection, only the newest handle is kept
    /// and the older one is left for the transport to reap on its own
    /// disconnect.
    pub fn register(&self, entry: ConnectionEntry) {
        self.entries.insert(entry.actor_id, entry);
    }

    /// Merge partial metadata into an existing entry. No-op if the actor is
    /// not currently connected.
    pub fn update_metadata(&self, actor_id: Uuid, patch: MetadataPatch) {
        if let Some(mut entry) = self.entries.get_mut(&actor_id) {
            if let Some(vehicle_type) = patch.vehicle_type {
                entry.vehicle_type = vehicle_type;
            }
            if let Some(on_duty) = patch.is_on_duty {
                entry.is_on_duty = on_duty;
            }
            if let Some(approved) = patch.is_approved {
                entry.is_approved = approved;
            }
            if let Some(status) = patch.approval_status {
                entry.approval_status = status;
            }
        }
    }

    pub fn update_location(&self, actor_id: Uuid, location: GeoPoint) {
        if let Some(mut entry) = self.entries.get_mut(&actor_id) {
            entry.location = Some(location);
        }
    }

    pub fn heartbeat(&self, actor_id: Uuid, at: DateTime<Utc>) {
        if let Some(mut entry) = self.entries.get_mut(&actor_id) {
            entry.last_heartbeat = at;
        }
    }

    /// Remove the entry only if it still holds the disconnecting handle, so
    /// a stale disconnect cannot evict a newer connection of the same actor.
    pub fn unregister(&self, actor_id: Uuid, conn: ConnId) -> bool {
        self.entries
            .remove_if(&actor_id, |_, entry| entry.conn == conn)
            .is_some()
    }

    pub fn get(&self, actor_id: Uuid) -> Option<ConnectionEntry> {
        self.entries.get(&actor_id).map(|e| e.clone())
    }

    pub fn contains(&self, actor_id: Uuid) -> bool {
        self.entries.contains_key(&actor_id)
    }

    /// Cloned, point-in-time copy of the table. Mutations after the call do
    /// not show through, so aggregation never observes torn state.
    pub fn snapshot(&self) -> Vec<ConnectionEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
