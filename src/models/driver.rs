use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    Customer,
    Driver,
    Admin,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// Vehicle class labels are part of the wire format; matching against an
/// order's required type is exact and case-sensitive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VehicleType {
    Bike,
    Auto,
    #[serde(rename = "Mini Truck")]
    MiniTruck,
    #[serde(rename = "Large Truck")]
    LargeTruck,
}

impl VehicleType {
    pub fn label(&self) -> &'static str {
        match self {
            VehicleType::Bike => "Bike",
            VehicleType::Auto => "Auto",
            VehicleType::MiniTruck => "Mini Truck",
            VehicleType::LargeTruck => "Large Truck",
        }
    }
}

impl std::fmt::Display for VehicleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DriverStats {
    pub deliveries: u32,
    pub rating: f64,
    pub earnings: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverRecord {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub is_approved: bool,
    pub approval_status: ApprovalStatus,
    pub rejection_reason: Option<String>,
    pub is_on_duty: bool,
    pub vehicle_id: Option<Uuid>,
    pub vehicle_type: Option<VehicleType>,
    pub stats: DriverStats,
    pub created_at: DateTime<Utc>,
}

impl DriverRecord {
    pub fn new(id: Uuid, name: String, phone: String, email: String) -> Self {
        Self {
            id,
            name,
            phone,
            email,
            role: Role::Driver,
            is_active: true,
            is_approved: false,
            approval_status: ApprovalStatus::Pending,
            rejection_reason: None,
            is_on_duty: false,
            vehicle_id: None,
            vehicle_type: None,
            stats: DriverStats::default(),
            created_at: Utc::now(),
        }
    }
}
