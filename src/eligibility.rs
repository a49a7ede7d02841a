use serde::Serialize;

use crate::models::driver::{ApprovalStatus, DriverRecord, Role, VehicleType};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Eligibility {
    pub eligible: bool,
    pub reasons: Vec<String>,
}

/// Decides whether a driver may be offered (or accept) an order requiring
/// `required`. Pure: no I/O, no clock, no hidden state. Every failing
/// condition is reported, not just the first, so the same call serves
/// dispatch and the "why am I not getting orders" diagnostics endpoint.
pub fn check(driver: &DriverRecord, required: VehicleType) -> Eligibility {
    let mut reasons = Vec::new();

    if driver.role != Role::Driver {
        reasons.push(format!("role is {:?}, not Driver", driver.role));
    }

    if !driver.is_active {
        reasons.push("account is deactivated".to_string());
    }

    if !(driver.is_approved && driver.approval_status == ApprovalStatus::Approved) {
        reasons.push(format!(
            "not approved (approvalStatus: {:?})",
            driver.approval_status
        ));
    }

    if !driver.is_on_duty {
        reasons.push("not on duty".to_string());
    }

    match driver.vehicle_type {
        None => reasons.push("vehicleType missing".to_string()),
        Some(have) if have != required => {
            reasons.push(format!("vehicleType is {have}, order requires {required}"));
        }
        Some(_) => {}
    }

    Eligibility {
        eligible: reasons.is_empty(),
        reasons,
    }
}
