use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::driver::{ApprovalStatus, Role, VehicleType};
use crate::models::events::ServerEvent;
use crate::registry::{ConnectionEntry, ConnectionRegistry};
use crate::state::AppState;
use crate::store::DurableStore;

const UNSPECIFIED_VEHICLE: &str = "Unspecified";

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FleetTotals {
    pub on_duty: usize,
    pub connected: usize,
    pub approved: usize,
    pub online: usize,
    pub offline: usize,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleBreakdown {
    pub total: usize,
    pub on_duty: usize,
    pub online: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverStatusRow {
    pub id: Uuid,
    pub name: String,
    pub vehicle_type: Option<VehicleType>,
    pub approval_status: ApprovalStatus,
    pub is_on_duty: bool,
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Registry entry with no matching durable on-duty record. Surfaced so
/// operators can see drift instead of it being silently dropped.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedEntry {
    pub actor_id: Uuid,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSnapshot {
    pub totals: FleetTotals,
    pub vehicle_type_breakdown: BTreeMap<String, VehicleBreakdown>,
    pub drivers: Vec<DriverStatusRow>,
    pub unmatched: Vec<UnmatchedEntry>,
}

/// Merge the durable on-duty set ("should be considered") with the registry
/// ("is reachable right now") into one consistent view.
///
/// Totals derive from the on-duty set: `online + offline == on_duty`, and
/// breakdown totals sum to `on_duty` (drivers without a vehicle type land in
/// an "Unspecified" bucket). `connected` counts reachable driver entries
/// regardless of duty.
pub fn build_snapshot(store: &DurableStore, registry: &ConnectionRegistry) -> FleetSnapshot {
    let live: HashMap<Uuid, ConnectionEntry> = registry
        .snapshot()
        .into_iter()
        .filter(|entry| entry.role == Role::Driver)
        .map(|entry| (entry.actor_id, entry))
        .collect();

    let on_duty: Vec<_> = store
        .list_drivers()
        .into_iter()
        .filter(|d| d.role == Role::Driver && d.is_on_duty)
        .collect();

    let mut totals = FleetTotals {
        on_duty: on_duty.len(),
        connected: live.len(),
        ..FleetTotals::default()
    };
    let mut breakdown: BTreeMap<String, VehicleBreakdown> = BTreeMap::new();
    let mut drivers = Vec::with_capacity(on_duty.len());

    for driver in &on_duty {
        let entry = live.get(&driver.id);
        let is_connected = entry.is_some();

        if is_connected {
            totals.online += 1;
        } else {
            totals.offline += 1;
        }
        if driver.approval_status == ApprovalStatus::Approved {
            totals.approved += 1;
        }

        let key = driver
            .vehicle_type
            .map(|v| v.label().to_string())
            .unwrap_or_else(|| UNSPECIFIED_VEHICLE.to_string());
        let bucket = breakdown.entry(key).or_default();
        bucket.total += 1;
        bucket.on_duty += 1;
        if is_connected {
            bucket.online += 1;
        }

        drivers.push(DriverStatusRow {
            id: driver.id,
            name: driver.name.clone(),
            vehicle_type: driver.vehicle_type,
            approval_status: driver.approval_status,
            is_on_duty: driver.is_on_duty,
            is_connected,
            last_heartbeat: entry.map(|e| e.last_heartbeat),
        });
    }

    let on_duty_ids: std::collections::HashSet<Uuid> = on_duty.iter().map(|d| d.id).collect();
    let unmatched = live
        .values()
        .filter(|entry| !on_duty_ids.contains(&entry.actor_id))
        .map(|entry| UnmatchedEntry {
            actor_id: entry.actor_id,
            name: entry.name.clone(),
            reason: match store.get_driver(entry.actor_id) {
                Some(_) => "connected but not on duty per durable record".to_string(),
                None => "connected but unknown to the durable store".to_string(),
            },
        })
        .collect();

    FleetSnapshot {
        totals,
        vehicle_type_breakdown: breakdown,
        drivers,
        unmatched,
    }
}

/// Rebuild and push the fleet view to every admin session. Called on each
/// registry-affecting event: connect, disconnect, duty toggle, approval or
/// activation change, heartbeat, acceptance.
pub fn publish(state: &AppState) {
    let snapshot = build_snapshot(&state.store, &state.registry);

    let mut by_role: HashMap<&'static str, i64> = HashMap::new();
    for entry in state.registry.snapshot() {
        let role = match entry.role {
            Role::Customer => "customer",
            Role::Driver => "driver",
            Role::Admin => "admin",
        };
        *by_role.entry(role).or_insert(0) += 1;
    }
    for role in ["customer", "driver", "admin"] {
        state
            .metrics
            .connected_actors
            .with_label_values(&[role])
            .set(by_role.get(role).copied().unwrap_or(0));
    }

    state
        .push
        .broadcast_admins(&ServerEvent::AdminDriversSnapshot(snapshot));
}
