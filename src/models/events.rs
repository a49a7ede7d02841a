use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::snapshot::FleetSnapshot;
use crate::models::driver::{ApprovalStatus, GeoPoint, Role, VehicleType};
use crate::models::order::{Address, CustomerRef, Order, OrderItem, OrderStatus, PaymentMethod};

/// Events a client may send over its socket. The shapes are fixed; frames
/// with unknown fields or variants are rejected at the parse boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ClientEvent {
    Register(RegisterPayload),
    UpdateLocation(LocationPayload),
    Heartbeat,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterPayload {
    pub role: Role,
    pub id: Uuid,
    pub name: String,
    pub vehicle_type: Option<VehicleType>,
    pub is_on_duty: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationPayload {
    pub lat: f64,
    pub lng: f64,
}

/// Events the core pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ServerEvent {
    NewOrderAvailable(OrderOffer),
    OrderAcceptedByOther(OrderAcceptedByOther),
    OrderAccepted(OrderAcceptedPayload),
    OrderStatusUpdate(OrderStatusUpdate),
    AdminDriversSnapshot(FleetSnapshot),
    ApprovalStatusUpdate(ApprovalUpdate),
    RegistrationRejected { reason: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderOffer {
    pub id: Uuid,
    pub customer: CustomerRef,
    pub pickup: Address,
    pub dropoff: Address,
    pub items: Vec<OrderItem>,
    pub vehicle_type: VehicleType,
    pub distance: f64,
    pub fare: f64,
    pub payment_method: PaymentMethod,
    pub created_at: DateTime<Utc>,
}

impl OrderOffer {
    pub fn from_order(order: &Order) -> Self {
        Self {
            id: order.id,
            customer: order.customer.clone(),
            pickup: order.pickup.clone(),
            dropoff: order.dropoff.clone(),
            items: order.items.clone(),
            vehicle_type: order.required_vehicle_type,
            distance: order.distance_km,
            fare: order.fare,
            payment_method: order.payment_method,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAcceptedByOther {
    pub order_id: Uuid,
    pub accepted_by: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverContact {
    pub name: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAcceptedPayload {
    pub order_id: Uuid,
    pub driver: DriverContact,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusUpdate {
    pub order_id: Uuid,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalUpdate {
    pub is_approved: bool,
    pub approval_status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl From<LocationPayload> for GeoPoint {
    fn from(p: LocationPayload) -> Self {
        GeoPoint { lat: p.lat, lng: p.lng }
    }
}
