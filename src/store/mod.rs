use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::eligibility;
use crate::error::AppError;
use crate::models::driver::{DriverRecord, VehicleType};
use crate::models::order::{Order, OrderStatus, CANCELLABLE};

/// System of record for drivers and orders. Order acceptance goes through
/// `conditionally_set_order_accepted` only; the status check and the write
/// happen under one shard lock, which makes the store the arbiter of the
/// multi-driver acceptance race.
#[derive(Default)]
pub struct DurableStore {
    drivers: DashMap<Uuid, DriverRecord>,
    orders: DashMap<Uuid, Order>,
}

impl DurableStore {
    pub fn new() -> Self {
        Self {
            drivers: DashMap::new(),
            orders: DashMap::new(),
        }
    }

    pub fn insert_driver(&self, driver: DriverRecord) {
        self.drivers.insert(driver.id, driver);
    }

    pub fn get_driver(&self, id: Uuid) -> Option<DriverRecord> {
        self.drivers.get(&id).map(|d| d.clone())
    }

    pub fn list_drivers(&self) -> Vec<DriverRecord> {
        self.drivers.iter().map(|d| d.value().clone()).collect()
    }

    pub fn update_driver<F>(&self, id: Uuid, mutate: F) -> Result<DriverRecord, AppError>
    where
        F: FnOnce(&mut DriverRecord),
    {
        let mut driver = self
            .drivers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;
        mutate(&mut driver);
        Ok(driver.clone())
    }

    /// All drivers that pass the eligibility filter for `vehicle_type`,
    /// connected or not. Reachability is the registry's concern.
    pub fn find_eligible_drivers(&self, vehicle_type: VehicleType) -> Vec<DriverRecord> {
        self.drivers
            .iter()
            .filter(|d| eligibility::check(d.value(), vehicle_type).eligible)
            .map(|d| d.value().clone())
            .collect()
    }

    pub fn insert_order(&self, order: Order) {
        self.orders.insert(order.id, order);
    }

    pub fn get_order(&self, id: Uuid) -> Option<Order> {
        self.orders.get(&id).map(|o| o.clone())
    }

    pub fn list_orders(&self) -> Vec<Order> {
        self.orders.iter().map(|o| o.value().clone()).collect()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    /// Compare-and-swap acceptance. The first caller to find the order still
    /// in one of `expected` flips it to Accepted and binds the driver; every
    /// later caller observes the mutated status and gets `Conflict`.
    pub fn conditionally_set_order_accepted(
        &self,
        order_id: Uuid,
        driver: &DriverRecord,
        expected: &[OrderStatus],
    ) -> Result<Order, AppError> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if !expected.contains(&order.status) {
            return Err(AppError::Conflict(format!(
                "order {order_id} is no longer available (status: {:?})",
                order.status
            )));
        }

        order.stamp_transition(OrderStatus::Accepted, Utc::now());
        order.driver_id = Some(driver.id);
        order.vehicle_id = driver.vehicle_id;
        Ok(order.clone())
    }

    /// Admin pre-assignment: Pending orders only.
    pub fn conditionally_set_order_assigned(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
    ) -> Result<Order, AppError> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.status != OrderStatus::Pending {
            return Err(AppError::Conflict(format!(
                "order {order_id} cannot be assigned (status: {:?})",
                order.status
            )));
        }

        order.status = OrderStatus::Assigned;
        order.driver_id = Some(driver_id);
        Ok(order.clone())
    }

    /// Driver-side lifecycle progression; the transition table in
    /// `OrderStatus` is enforced under the same shard lock as the write.
    pub fn transition_order(
        &self,
        order_id: Uuid,
        next: OrderStatus,
        driver_id: Uuid,
    ) -> Result<Order, AppError> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.driver_id != Some(driver_id) {
            return Err(AppError::Forbidden {
                reasons: vec!["order is bound to a different driver".to_string()],
            });
        }

        if !order.status.can_progress_to(next) {
            return Err(AppError::Conflict(format!(
                "cannot move order from {:?} to {next:?}",
                order.status
            )));
        }

        order.stamp_transition(next, Utc::now());
        Ok(order.clone())
    }

    pub fn cancel_order(&self, order_id: Uuid) -> Result<Order, AppError> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if !CANCELLABLE.contains(&order.status) {
            return Err(AppError::Conflict(format!(
                "order {order_id} cannot be cancelled (status: {:?})",
                order.status
            )));
        }

        order.stamp_transition(OrderStatus::Cancelled, Utc::now());
        Ok(order.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use uuid::Uuid;

    use super::DurableStore;
    use crate::error::AppError;
    use crate::models::driver::{ApprovalStatus, DriverRecord, VehicleType};
    use crate::models::order::{
        Address, CustomerRef, Order, OrderStatus, PaymentMethod, ACCEPTABLE,
    };

    fn approved_driver(seed: u128, vehicle_type: VehicleType) -> DriverRecord {
        let mut d = DriverRecord::new(
            Uuid::from_u128(seed),
            format!("driver-{seed}"),
            "+49123".to_string(),
            "d@example.com".to_string(),
        );
        d.is_approved = true;
        d.approval_status = ApprovalStatus::Approved;
        d.is_on_duty = true;
        d.vehicle_type = Some(vehicle_type);
        d.vehicle_id = Some(Uuid::from_u128(seed + 1000));
        d
    }

    fn pending_order(seed: u128, vehicle_type: VehicleType) -> Order {
        let point = crate::models::driver::GeoPoint { lat: 0.0, lng: 0.0 };
        Order {
            id: Uuid::from_u128(seed),
            customer: CustomerRef {
                id: Uuid::from_u128(seed + 500),
                name: "customer".to_string(),
                phone: "+49456".to_string(),
            },
            required_vehicle_type: vehicle_type,
            pickup: Address {
                label: "warehouse".to_string(),
                location: point,
            },
            dropoff: Address {
                label: "home".to_string(),
                location: point,
            },
            items: vec![],
            distance_km: 1.0,
            fare: 120.0,
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

    #[test]
    fn accept_binds_driver_and_stamps_time() {
        let store = DurableStore::new();
        let driver = approved_driver(1, VehicleType::Auto);
        store.insert_order(pending_order(10, VehicleType::Auto));

        let order = store
            .conditionally_set_order_accepted(Uuid::from_u128(10), &driver, &ACCEPTABLE)
            .unwrap();

        assert_eq!(order.status, OrderStatus::Accepted);
        assert_eq!(order.driver_id, Some(driver.id));
        assert_eq!(order.vehicle_id, driver.vehicle_id);
        assert!(order.accepted_at.is_some());
    }

    #[test]
    fn second_accept_gets_conflict() {
        let store = DurableStore::new();
        let first = approved_driver(1, VehicleType::Auto);
        let second = approved_driver(2, VehicleType::Auto);
        store.insert_order(pending_order(10, VehicleType::Auto));

        store
            .conditionally_set_order_accepted(Uuid::from_u128(10), &first, &ACCEPTABLE)
            .unwrap();
        let loss =
            store.conditionally_set_order_accepted(Uuid::from_u128(10), &second, &ACCEPTABLE);

        assert!(matches!(loss, Err(AppError::Conflict(_))));
        // the winner's binding is untouched
        assert_eq!(
            store.get_order(Uuid::from_u128(10)).unwrap().driver_id,
            Some(first.id)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_accepts_produce_exactly_one_winner() {
        let store = Arc::new(DurableStore::new());
        store.insert_order(pending_order(10, VehicleType::Auto));

        let mut handles = Vec::new();
        for seed in 0..16u128 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let driver = approved_driver(seed + 1, VehicleType::Auto);
                store.conditionally_set_order_accepted(Uuid::from_u128(10), &driver, &ACCEPTABLE)
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(AppError::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(conflicts, 15);
    }

    #[test]
    fn admin_assigned_order_can_still_be_accepted() {
        let store = DurableStore::new();
        let assignee = approved_driver(1, VehicleType::Auto);
        let acceptor = approved_driver(2, VehicleType::Auto);
        store.insert_order(pending_order(10, VehicleType::Auto));

        store
            .conditionally_set_order_assigned(Uuid::from_u128(10), assignee.id)
            .unwrap();
        let order = store
            .conditionally_set_order_accepted(Uuid::from_u128(10), &acceptor, &ACCEPTABLE)
            .unwrap();

        assert_eq!(order.status, OrderStatus::Accepted);
        assert_eq!(order.driver_id, Some(acceptor.id));
    }

    #[test]
    fn transition_requires_bound_driver() {
        let store = DurableStore::new();
        let driver = approved_driver(1, VehicleType::Auto);
        let stranger = approved_driver(2, VehicleType::Auto);
        store.insert_order(pending_order(10, VehicleType::Auto));
        store
            .conditionally_set_order_accepted(Uuid::from_u128(10), &driver, &ACCEPTABLE)
            .unwrap();

        let denied = store.transition_order(Uuid::from_u128(10), OrderStatus::Arrived, stranger.id);
        assert!(matches!(denied, Err(AppError::Forbidden { .. })));

        let order = store
            .transition_order(Uuid::from_u128(10), OrderStatus::Arrived, driver.id)
            .unwrap();
        assert_eq!(order.status, OrderStatus::Arrived);
    }

    #[test]
    fn cancel_only_from_cancellable_statuses() {
        let store = DurableStore::new();
        let driver = approved_driver(1, VehicleType::Auto);
        store.insert_order(pending_order(10, VehicleType::Auto));
        store.insert_order(pending_order(11, VehicleType::Auto));

        assert!(store.cancel_order(Uuid::from_u128(11)).is_ok());

        store
            .conditionally_set_order_accepted(Uuid::from_u128(10), &driver, &ACCEPTABLE)
            .unwrap();
        assert!(store.cancel_order(Uuid::from_u128(10)).is_ok());

        // delivered orders are terminal
        let order_id = Uuid::from_u128(12);
        let mut delivered = pending_order(12, VehicleType::Auto);
        delivered.status = OrderStatus::Delivered;
        store.insert_order(delivered);
        assert!(matches!(
            store.cancel_order(order_id),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn eligible_driver_query_applies_the_filter() {
        let store = DurableStore::new();
        store.insert_driver(approved_driver(1, VehicleType::Auto));
        store.insert_driver(approved_driver(2, VehicleType::Bike));
        let mut off_duty = approved_driver(3, VehicleType::Auto);
        off_duty.is_on_duty = false;
        store.insert_driver(off_duty);

        let eligible = store.find_eligible_drivers(VehicleType::Auto);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, Uuid::from_u128(1));
    }
}
