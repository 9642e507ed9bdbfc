//! Typed client copies of backend rows.
//!
//! The backend owns every entity's lifecycle. These structs are what the
//! dashboards read out of the query cache; unknown columns are ignored so a
//! backend migration never breaks decoding.

use crate::{BoqStatus, EntityId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    pub vendor_id: EntityId,
    pub company_name: String,
    #[serde(default)]
    pub contact_person_name: Option<String>,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub country: String,
    #[serde(default)]
    pub gst_number: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub purchase_id: EntityId,
    pub project_id: EntityId,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub boq_id: Option<EntityId>,
    #[serde(default)]
    pub vendor_id: Option<EntityId>,
    pub status: String,
    #[serde(default)]
    pub total_amount: Option<f64>,
    #[serde(default)]
    pub created_by: Option<EntityId>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boq {
    pub boq_id: EntityId,
    pub project_id: EntityId,
    pub boq_name: String,
    pub status: BoqStatus,
    #[serde(default)]
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub created_by: Option<EntityId>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoqItem {
    pub item_id: EntityId,
    pub boq_id: EntityId,
    pub item_name: String,
    pub quantity: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub rate: Option<f64>,
}

impl BoqItem {
    pub fn amount(&self) -> f64 {
        self.quantity * self.rate.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub cr_id: EntityId,
    pub project_id: EntityId,
    #[serde(default)]
    pub boq_id: Option<EntityId>,
    pub status: String,
    #[serde(default)]
    pub requested_by: Option<EntityId>,
    #[serde(default)]
    pub justification: Option<String>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorDeliveryInspection {
    pub id: EntityId,
    pub purchase_id: EntityId,
    pub vendor_id: EntityId,
    pub status: String,
    #[serde(default)]
    pub inspected_by: Option<EntityId>,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub inspected_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorReturnRequest {
    pub id: EntityId,
    pub inspection_id: EntityId,
    pub vendor_id: EntityId,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}
