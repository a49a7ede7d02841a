use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::driver::Role;
use crate::models::events::{OrderOffer, OrderStatusUpdate, ServerEvent};
use crate::models::order::Order;
use crate::registry::ConnId;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub offered_count: usize,
    pub unreachable_count: usize,
    pub offered_to: Vec<Uuid>,
    pub unreachable_drivers: Vec<Uuid>,
}

/// One dispatch round: durable eligibility set intersected with the live
/// registry, an offer pushed to every driver in the intersection. Eligible
/// drivers without a connection simply miss this round; there is no queue
/// and no retry on their behalf. The round itself never fails: a dead push
/// channel degrades to an all-unreachable outcome, and order persistence has
/// already happened by the time this runs.
pub fn notify_order(state: &AppState, order: &Order) -> DispatchOutcome {
    let eligible = state.store.find_eligible_drivers(order.required_vehicle_type);

    // Point-in-time view: a driver connecting mid-round is missed, which is
    // accepted (best-effort dispatch, recovered by the explicit retry path).
    let live: HashMap<Uuid, ConnId> = state
        .registry
        .snapshot()
        .into_iter()
        .filter(|entry| entry.role == Role::Driver)
        .map(|entry| (entry.actor_id, entry.conn))
        .collect();

    let offer = ServerEvent::NewOrderAvailable(OrderOffer::from_order(order));
    let mut outcome = DispatchOutcome::default();

    for driver in &eligible {
        match live.get(&driver.id) {
            Some(conn) => match state.push.send(*conn, &offer) {
                Ok(()) => {
                    outcome.offered_count += 1;
                    outcome.offered_to.push(driver.id);
                }
                Err(err) => {
                    warn!(order_id = %order.id, driver_id = %driver.id, error = %err,
                        "offer push failed; treating driver as unreachable");
                    outcome.unreachable_count += 1;
                    outcome.unreachable_drivers.push(driver.id);
                }
            },
            None => {
                outcome.unreachable_count += 1;
                outcome.unreachable_drivers.push(driver.id);
            }
        }
    }

    state
        .metrics
        .offers_total
        .with_label_values(&["sent"])
        .inc_by(outcome.offered_count as u64);
    state
        .metrics
        .offers_total
        .with_label_values(&["unreachable"])
        .inc_by(outcome.unreachable_count as u64);

    // Admin visibility does not gate on eligibility.
    state
        .push
        .broadcast_admins(&ServerEvent::OrderStatusUpdate(OrderStatusUpdate {
            order_id: order.id,
            status: order.status,
            driver: order.driver_id,
        }));

    info!(
        order_id = %order.id,
        vehicle_type = %order.required_vehicle_type,
        offered = outcome.offered_count,
        unreachable = outcome.unreachable_count,
        "dispatch round finished"
    );

    outcome
}
