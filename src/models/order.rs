use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::{GeoPoint, VehicleType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentMethod {
    Cash,
    Card,
    Wallet,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Assigned,
    Accepted,
    Arrived,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

/// Statuses from which a driver accept may still win the order.
pub const ACCEPTABLE: [OrderStatus; 2] = [OrderStatus::Pending, OrderStatus::Assigned];

/// Statuses from which the customer may still cancel.
pub const CANCELLABLE: [OrderStatus; 3] = [
    OrderStatus::Pending,
    OrderStatus::Assigned,
    OrderStatus::Accepted,
];

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Forward progression the bound driver is allowed to drive.
    pub fn can_progress_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Accepted, OrderStatus::Arrived)
                | (OrderStatus::Arrived, OrderStatus::PickedUp)
                | (OrderStatus::PickedUp, OrderStatus::InTransit)
                | (OrderStatus::InTransit, OrderStatus::Delivered)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRef {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub label: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub customer: CustomerRef,
    pub required_vehicle_type: VehicleType,
    pub pickup: Address,
    pub dropoff: Address,
    pub items: Vec<OrderItem>,
    pub distance_km: f64,
    pub fare: f64,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn stamp_transition(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        self.status = status;
        match status {
            OrderStatus::Accepted => self.accepted_at = Some(at),
            OrderStatus::Arrived => self.arrived_at = Some(at),
            OrderStatus::PickedUp => self.picked_up_at = Some(at),
            OrderStatus::Delivered => self.delivered_at = Some(at),
            OrderStatus::Cancelled => self.cancelled_at = Some(at),
            _ => {}
        }
    }
}
