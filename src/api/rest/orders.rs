use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::dispatch::{engine, notifier, resolver};
use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::driver::VehicleType;
use crate::models::order::{
    Address, CustomerRef, Order, OrderItem, OrderStatus, PaymentMethod,
};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/retry", post(retry_dispatch))
        .route("/orders/:id/accept", post(accept_order))
        .route("/orders/:id/assign", post(assign_order))
        .route("/orders/:id/status", patch(update_status))
        .route("/orders/:id/cancel", post(cancel_order))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub customer: CustomerRef,
    pub vehicle_type: VehicleType,
    pub pickup: Address,
    pub dropoff: Address,
    pub items: Vec<OrderItem>,
    pub fare: f64,
    pub payment_method: PaymentMethod,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverActionRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub driver_id: Uuid,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    if payload.customer.name.trim().is_empty() {
        return Err(AppError::BadRequest(
            "customer name cannot be empty".to_string(),
        ));
    }
    if payload.fare < 0.0 {
        return Err(AppError::BadRequest("fare cannot be negative".to_string()));
    }

    let distance_km = haversine_km(&payload.pickup.location, &payload.dropoff.location);
    let order = Order {
        id: Uuid::new_v4(),
        customer: payload.customer,
        required_vehicle_type: payload.vehicle_type,
        pickup: payload.pickup,
        dropoff: payload.dropoff,
        items: payload.items,
        distance_km,
        fare: payload.fare,
        payment_method: payload.payment_method,
        status: OrderStatus::Pending,
        driver_id: None,
        vehicle_id: None,
        created_at: Utc::now(),
        accepted_at: None,
        arrived_at: None,
        picked_up_at: None,
        delivered_at: None,
        cancelled_at: None,
    };

    // Persist first; dispatch trouble never rolls an order back.
    state.store.insert_order(order.clone());
    engine::enqueue_dispatch(&state, order.id).await;

    Ok(Json(order))
}

async fn list_orders(State(state): State<Arc<AppState>>) -> Json<Vec<Order>> {
    Json(state.store.list_orders())
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .store
        .get_order(id)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;
    Ok(Json(order))
}

/// Customer- or admin-triggered re-run of the dispatch round for an order
/// that is still waiting for a driver.
async fn retry_dispatch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<notifier::DispatchOutcome>, AppError> {
    let order = state
        .store
        .get_order(id)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

    if order.status != OrderStatus::Pending {
        return Err(AppError::Conflict(format!(
            "order {id} is not pending (status: {:?})",
            order.status
        )));
    }

    Ok(Json(notifier::notify_order(&state, &order)))
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Order>, AppError> {
    let order = resolver::accept_order(&state, id, payload.driver_id)?;
    Ok(Json(order))
}

async fn assign_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Order>, AppError> {
    let order = resolver::assign_order(&state, id, payload.driver_id)?;
    Ok(Json(order))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    let order = resolver::progress_order(&state, id, payload.status, payload.driver_id)?;
    Ok(Json(order))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = resolver::cancel_order(&state, id)?;
    Ok(Json(order))
}
