use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::dispatch::snapshot;
use crate::eligibility::{self, Eligibility};
use crate::error::AppError;
use crate::models::driver::{ApprovalStatus, DriverRecord, VehicleType};
use crate::models::events::{ApprovalUpdate, ServerEvent};
use crate::registry::MetadataPatch;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/duty", patch(update_duty))
        .route("/drivers/:id/approval", patch(update_approval))
        .route("/drivers/:id/active", patch(update_active))
        .route("/drivers/:id/vehicle", patch(update_vehicle))
        .route("/drivers/:id/eligibility", get(explain_eligibility))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDriverRequest {
    pub name: String,
    pub phone: String,
    pub email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDutyRequest {
    pub is_on_duty: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateApprovalRequest {
    pub approval_status: ApprovalStatus,
    pub rejection_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateActiveRequest {
    pub is_active: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVehicleRequest {
    pub vehicle_type: VehicleType,
    pub vehicle_id: Option<Uuid>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityQuery {
    pub vehicle_type: VehicleType,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<DriverRecord>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let driver = DriverRecord::new(Uuid::new_v4(), payload.name, payload.phone, payload.email);
    state.store.insert_driver(driver.clone());
    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<DriverRecord>> {
    Json(state.store.list_drivers())
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverRecord>, AppError> {
    let driver = state
        .store
        .get_driver(id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;
    Ok(Json(driver))
}

async fn update_duty(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateDutyRequest>,
) -> Result<Json<DriverRecord>, AppError> {
    let current = state
        .store
        .get_driver(id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    if payload.is_on_duty && !current.is_active {
        return Err(AppError::Forbidden {
            reasons: vec!["account is deactivated".to_string()],
        });
    }

    let driver = state
        .store
        .update_driver(id, |d| d.is_on_duty = payload.is_on_duty)?;

    state.registry.update_metadata(
        id,
        MetadataPatch {
            is_on_duty: Some(payload.is_on_duty),
            ..MetadataPatch::default()
        },
    );
    snapshot::publish(&state);

    Ok(Json(driver))
}

async fn update_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateApprovalRequest>,
) -> Result<Json<DriverRecord>, AppError> {
    let approved = payload.approval_status == ApprovalStatus::Approved;
    let rejection_reason = payload.rejection_reason.clone();

    let driver = state.store.update_driver(id, |d| {
        d.approval_status = payload.approval_status;
        d.is_approved = approved;
        d.rejection_reason = if approved { None } else { rejection_reason.clone() };
    })?;

    state.registry.update_metadata(
        id,
        MetadataPatch {
            is_approved: Some(approved),
            approval_status: Some(payload.approval_status),
            ..MetadataPatch::default()
        },
    );

    // The affected driver hears about the decision on their live connection.
    if let Some(entry) = state.registry.get(id) {
        let _ = state.push.send(
            entry.conn,
            &ServerEvent::ApprovalStatusUpdate(ApprovalUpdate {
                is_approved: approved,
                approval_status: payload.approval_status,
                rejection_reason: driver.rejection_reason.clone(),
            }),
        );
    }
    snapshot::publish(&state);

    Ok(Json(driver))
}

async fn update_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateActiveRequest>,
) -> Result<Json<DriverRecord>, AppError> {
    let driver = state.store.update_driver(id, |d| {
        d.is_active = payload.is_active;
        if !payload.is_active {
            // admin kill-switch always takes the driver off duty
            d.is_on_duty = false;
        }
    })?;

    state.registry.update_metadata(
        id,
        MetadataPatch {
            is_on_duty: Some(driver.is_on_duty),
            ..MetadataPatch::default()
        },
    );
    snapshot::publish(&state);

    Ok(Json(driver))
}

async fn update_vehicle(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateVehicleRequest>,
) -> Result<Json<DriverRecord>, AppError> {
    let driver = state.store.update_driver(id, |d| {
        d.vehicle_type = Some(payload.vehicle_type);
        d.vehicle_id = payload.vehicle_id;
    })?;

    state.registry.update_metadata(
        id,
        MetadataPatch {
            vehicle_type: Some(Some(payload.vehicle_type)),
            ..MetadataPatch::default()
        },
    );
    snapshot::publish(&state);

    Ok(Json(driver))
}

/// Self-diagnosis: the same pure check dispatch uses, with every failing
/// condition listed.
async fn explain_eligibility(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<EligibilityQuery>,
) -> Result<Json<Eligibility>, AppError> {
    let driver = state
        .store
        .get_driver(id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    Ok(Json(eligibility::check(&driver, query.vehicle_type)))
}
