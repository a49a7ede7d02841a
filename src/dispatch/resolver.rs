use tracing::info;
use uuid::Uuid;

use crate::dispatch::snapshot;
use crate::eligibility;
use crate::error::AppError;
use crate::models::events::{
    DriverContact, OrderAcceptedByOther, OrderAcceptedPayload, OrderOffer, OrderStatusUpdate,
    ServerEvent,
};
use crate::models::order::{Order, OrderStatus, ACCEPTABLE};
use crate::state::AppState;

fn accept_outcome_label(result: &Result<Order, AppError>) -> &'static str {
    match result {
        Ok(_) => "accepted",
        Err(AppError::Conflict(_)) => "conflict",
        Err(AppError::Forbidden { .. }) => "forbidden",
        Err(AppError::NotFound(_)) => "not_found",
        Err(_) => "error",
    }
}

/// Resolve a driver's claim on an order. Eligibility is re-validated here
/// regardless of what the driver's client was told: the offer is advisory,
/// not authorization. The conditional write in the store is what serializes
/// racing accepts; exactly one caller ever sees Ok.
pub fn accept_order(state: &AppState, order_id: Uuid, driver_id: Uuid) -> Result<Order, AppError> {
    let result = try_accept(state, order_id, driver_id);
    state
        .metrics
        .accepts_total
        .with_label_values(&[accept_outcome_label(&result)])
        .inc();
    result
}

fn try_accept(state: &AppState, order_id: Uuid, driver_id: Uuid) -> Result<Order, AppError> {
    let driver = state
        .store
        .get_driver(driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
    let order = state
        .store
        .get_order(order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    let verdict = eligibility::check(&driver, order.required_vehicle_type);
    if !verdict.eligible {
        return Err(AppError::Forbidden {
            reasons: verdict.reasons,
        });
    }

    // The candidate set the offers went to, minus the winner, becomes the
    // losing side. Computed before the write so losers are told even if
    // their duty state changes afterwards.
    let candidates = state.store.find_eligible_drivers(order.required_vehicle_type);

    let accepted = state
        .store
        .conditionally_set_order_accepted(order_id, &driver, &ACCEPTABLE)?;

    let gone = ServerEvent::OrderAcceptedByOther(OrderAcceptedByOther {
        order_id: accepted.id,
        accepted_by: driver.name.clone(),
    });
    for loser in candidates.iter().filter(|c| c.id != driver.id) {
        if let Some(entry) = state.registry.get(loser.id) {
            let _ = state.push.send(entry.conn, &gone);
        }
    }

    if let Some(customer) = state.registry.get(accepted.customer.id) {
        let _ = state.push.send(
            customer.conn,
            &ServerEvent::OrderAccepted(OrderAcceptedPayload {
                order_id: accepted.id,
                driver: DriverContact {
                    name: driver.name.clone(),
                    phone: driver.phone.clone(),
                    email: driver.email.clone(),
                },
            }),
        );
    }

    broadcast_status(state, &accepted);
    snapshot::publish(state);

    info!(order_id = %accepted.id, driver_id = %driver.id, "order accepted");
    Ok(accepted)
}

/// Admin path: pre-assign a Pending order to a specific driver. The driver
/// still has to accept; the order moves to Assigned and the driver gets the
/// offer directly.
pub fn assign_order(state: &AppState, order_id: Uuid, driver_id: Uuid) -> Result<Order, AppError> {
    let driver = state
        .store
        .get_driver(driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
    let order = state
        .store
        .get_order(order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    let verdict = eligibility::check(&driver, order.required_vehicle_type);
    if !verdict.eligible {
        return Err(AppError::Forbidden {
            reasons: verdict.reasons,
        });
    }

    let assigned = state
        .store
        .conditionally_set_order_assigned(order_id, driver_id)?;

    if let Some(entry) = state.registry.get(driver.id) {
        let _ = state.push.send(
            entry.conn,
            &ServerEvent::NewOrderAvailable(OrderOffer::from_order(&assigned)),
        );
    }
    broadcast_status(state, &assigned);

    info!(order_id = %assigned.id, driver_id = %driver.id, "order assigned by admin");
    Ok(assigned)
}

/// Driver-side lifecycle progression. Delivered closes the loop and rolls
/// the fare into the driver's cumulative stats.
pub fn progress_order(
    state: &AppState,
    order_id: Uuid,
    next: OrderStatus,
    driver_id: Uuid,
) -> Result<Order, AppError> {
    let order = state.store.transition_order(order_id, next, driver_id)?;

    if order.status == OrderStatus::Delivered {
        state.store.update_driver(driver_id, |driver| {
            driver.stats.deliveries += 1;
            driver.stats.earnings += order.fare;
        })?;
    }

    broadcast_status(state, &order);
    Ok(order)
}

/// Customer-initiated cancellation; only the statuses before pickup allow it.
pub fn cancel_order(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    let order = state.store.cancel_order(order_id)?;
    broadcast_status(state, &order);
    info!(order_id = %order.id, "order cancelled by customer");
    Ok(order)
}

fn broadcast_status(state: &AppState, order: &Order) {
    state
        .push
        .broadcast_admins(&ServerEvent::OrderStatusUpdate(OrderStatusUpdate {
            order_id: order.id,
            status: order.status,
            driver: order.driver_id,
        }));
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::{accept_order, assign_order, cancel_order, progress_order};
    use crate::error::AppError;
    use crate::models::driver::{ApprovalStatus, DriverRecord, GeoPoint, Role, VehicleType};
    use crate::models::events::ServerEvent;
    use crate::models::order::{Address, CustomerRef, Order, OrderStatus, PaymentMethod};
    use crate::push::PushChannel;
    use crate::registry::{ConnId, ConnectionEntry};
    use crate::state::AppState;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<(ConnId, ServerEvent)>>,
        broadcasts: Mutex<Vec<ServerEvent>>,
    }

    impl PushChannel for RecordingChannel {
        fn attach(&self, _conn: ConnId, _tx: mpsc::UnboundedSender<String>) {}
        fn detach(&self, _conn: ConnId) {}
        fn mark_admin(&self, _conn: ConnId) {}

        fn send(&self, conn: ConnId, event: &ServerEvent) -> Result<(), AppError> {
            self.sent.lock().unwrap().push((conn, event.clone()));
            Ok(())
        }

        fn broadcast_admins(&self, event: &ServerEvent) {
            self.broadcasts.lock().unwrap().push(event.clone());
        }

        fn connected_count(&self) -> usize {
            0
        }
    }

    fn driver(seed: u128, vehicle_type: VehicleType) -> DriverRecord {
        let mut d = DriverRecord::new(
            Uuid::from_u128(seed),
            format!("driver-{seed}"),
            format!("+4912{seed}"),
            format!("driver-{seed}@example.com"),
        );
        d.is_approved = true;
        d.approval_status = ApprovalStatus::Approved;
        d.is_on_duty = true;
        d.vehicle_type = Some(vehicle_type);
        d
    }

    fn connect(state: &AppState, record: &DriverRecord, conn: u128) -> ConnId {
        let conn = Uuid::from_u128(conn);
        state.registry.register(ConnectionEntry {
            actor_id: record.id,
            conn,
            role: Role::Driver,
            name: record.name.clone(),
            vehicle_type: record.vehicle_type,
            is_on_duty: record.is_on_duty,
            is_approved: record.is_approved,
            approval_status: record.approval_status,
            location: None,
            last_heartbeat: Utc::now(),
        });
        conn
    }

    fn order(seed: u128, vehicle_type: VehicleType) -> Order {
        let point = GeoPoint { lat: 0.0, lng: 0.0 };
        Order {
            id: Uuid::from_u128(seed),
            customer: CustomerRef {
                id: Uuid::from_u128(seed + 500),
                name: "customer".to_string(),
                phone: "+49456".to_string(),
            },
            required_vehicle_type: vehicle_type,
            pickup: Address {
                label: "a".to_string(),
                location: point,
            },
            dropoff: Address {
                label: "b".to_string(),
                location: point,
            },
            items: vec![],
            distance_km: 2.5,
            fare: 90.0,
            payment_method: PaymentMethod::Cash,
            status: OrderStatus::Pending,
            driver_id: None,
            vehicle_id: None,
            created_at: Utc::now(),
            accepted_at: None,
            arrived_at: None,
            picked_up_at: None,
            delivered_at: None,
            cancelled_at: None,
        }
    }

    fn setup() -> (AppState, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel::default());
        let (state, _rx) = AppState::new(channel.clone(), 16);
        (state, channel)
    }

    #[test]
    fn race_has_one_winner_and_loser_is_told() {
        let (state, channel) = setup();

        let winner = driver(1, VehicleType::Auto);
        let loser = driver(2, VehicleType::Auto);
        state.store.insert_driver(winner.clone());
        state.store.insert_driver(loser.clone());
        connect(&state, &winner, 10);
        let loser_conn = connect(&state, &loser, 11);
        state.store.insert_order(order(99, VehicleType::Auto));

        let won = accept_order(&state, Uuid::from_u128(99), winner.id).unwrap();
        assert_eq!(won.status, OrderStatus::Accepted);
        assert_eq!(won.driver_id, Some(winner.id));

        let lost = accept_order(&state, Uuid::from_u128(99), loser.id);
        assert!(matches!(lost, Err(AppError::Conflict(_))));

        let sent = channel.sent.lock().unwrap();
        let to_loser: Vec<_> = sent
            .iter()
            .filter(|(conn, event)| {
                *conn == loser_conn && matches!(event, ServerEvent::OrderAcceptedByOther(_))
            })
            .collect();
        assert_eq!(to_loser.len(), 1);
        match &to_loser[0].1 {
            ServerEvent::OrderAcceptedByOther(payload) => {
                assert_eq!(payload.order_id, Uuid::from_u128(99));
                assert_eq!(payload.accepted_by, winner.name);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn connected_customer_gets_driver_contact() {
        let (state, channel) = setup();

        let winner = driver(1, VehicleType::Auto);
        state.store.insert_driver(winner.clone());
        connect(&state, &winner, 10);

        let the_order = order(99, VehicleType::Auto);
        let customer_conn = Uuid::from_u128(20);
        state.registry.register(ConnectionEntry {
            actor_id: the_order.customer.id,
            conn: customer_conn,
            role: Role::Customer,
            name: the_order.customer.name.clone(),
            vehicle_type: None,
            is_on_duty: false,
            is_approved: false,
            approval_status: ApprovalStatus::Pending,
            location: None,
            last_heartbeat: Utc::now(),
        });
        state.store.insert_order(the_order);

        accept_order(&state, Uuid::from_u128(99), winner.id).unwrap();

        let sent = channel.sent.lock().unwrap();
        let to_customer: Vec<_> = sent
            .iter()
            .filter(|(conn, _)| *conn == customer_conn)
            .collect();
        assert_eq!(to_customer.len(), 1);
        match &to_customer[0].1 {
            ServerEvent::OrderAccepted(payload) => {
                assert_eq!(payload.driver.name, winner.name);
                assert_eq!(payload.driver.phone, winner.phone);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn accept_revalidates_server_side() {
        let (state, _channel) = setup();

        // off duty by the time the accept arrives, whatever the client saw
        let mut stale = driver(1, VehicleType::Auto);
        stale.is_on_duty = false;
        state.store.insert_driver(stale.clone());
        state.store.insert_order(order(99, VehicleType::Auto));

        let result = accept_order(&state, Uuid::from_u128(99), stale.id);
        match result {
            Err(AppError::Forbidden { reasons }) => {
                assert!(reasons.iter().any(|r| r.contains("not on duty")));
            }
            other => panic!("expected Forbidden, got {other:?}"),
        }
    }

    #[test]
    fn accept_of_missing_order_is_not_found() {
        let (state, _channel) = setup();
        let d = driver(1, VehicleType::Auto);
        state.store.insert_driver(d.clone());

        let result = accept_order(&state, Uuid::from_u128(404), d.id);
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn assigned_order_can_be_accepted_by_the_assignee() {
        let (state, _channel) = setup();
        let d = driver(1, VehicleType::Auto);
        state.store.insert_driver(d.clone());
        state.store.insert_order(order(99, VehicleType::Auto));

        let assigned = assign_order(&state, Uuid::from_u128(99), d.id).unwrap();
        assert_eq!(assigned.status, OrderStatus::Assigned);

        let accepted = accept_order(&state, Uuid::from_u128(99), d.id).unwrap();
        assert_eq!(accepted.status, OrderStatus::Accepted);
    }

    #[test]
    fn delivery_updates_driver_stats() {
        let (state, _channel) = setup();
        let d = driver(1, VehicleType::Auto);
        state.store.insert_driver(d.clone());
        state.store.insert_order(order(99, VehicleType::Auto));
        let order_id = Uuid::from_u128(99);

        accept_order(&state, order_id, d.id).unwrap();
        progress_order(&state, order_id, OrderStatus::Arrived, d.id).unwrap();
        progress_order(&state, order_id, OrderStatus::PickedUp, d.id).unwrap();
        progress_order(&state, order_id, OrderStatus::InTransit, d.id).unwrap();
        let delivered = progress_order(&state, order_id, OrderStatus::Delivered, d.id).unwrap();

        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert!(delivered.delivered_at.is_some());

        let updated = state.store.get_driver(d.id).unwrap();
        assert_eq!(updated.stats.deliveries, 1);
        assert!((updated.stats.earnings - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cancelled_order_cannot_be_accepted() {
        let (state, _channel) = setup();
        let d = driver(1, VehicleType::Auto);
        state.store.insert_driver(d.clone());
        state.store.insert_order(order(99, VehicleType::Auto));

        cancel_order(&state, Uuid::from_u128(99)).unwrap();
        let result = accept_order(&state, Uuid::from_u128(99), d.id);
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }
}
