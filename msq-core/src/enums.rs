//! Enum types for MeterSquare entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TABLES
// ============================================================================

/// Backend tables that publish row-level changes to connected clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Boqs,
    BoqItems,
    Purchases,
    ChangeRequests,
    Vendors,
    VendorDeliveryInspections,
    VendorReturnRequests,
    Notifications,
}

impl Table {
    pub const ALL: [Table; 8] = [
        Table::Boqs,
        Table::BoqItems,
        Table::Purchases,
        Table::ChangeRequests,
        Table::Vendors,
        Table::VendorDeliveryInspections,
        Table::VendorReturnRequests,
        Table::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Boqs => "boqs",
            Table::BoqItems => "boq_items",
            Table::Purchases => "purchases",
            Table::ChangeRequests => "change_requests",
            Table::Vendors => "vendors",
            Table::VendorDeliveryInspections => "vendor_delivery_inspections",
            Table::VendorReturnRequests => "vendor_return_requests",
            Table::Notifications => "notifications",
        }
    }

    /// Primary key column carried in change payloads.
    pub fn primary_key(&self) -> &'static str {
        match self {
            Table::Boqs => "boq_id",
            Table::BoqItems => "item_id",
            Table::Purchases => "purchase_id",
            Table::ChangeRequests => "cr_id",
            Table::Vendors => "vendor_id",
            Table::VendorDeliveryInspections
            | Table::VendorReturnRequests
            | Table::Notifications => "id",
        }
    }

    /// Human label used in user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            Table::Boqs => "BOQs",
            Table::BoqItems => "BOQ items",
            Table::Purchases => "Purchase orders",
            Table::ChangeRequests => "Change requests",
            Table::Vendors => "Vendors",
            Table::VendorDeliveryInspections => "Vendor inspections",
            Table::VendorReturnRequests => "Vendor returns",
            Table::Notifications => "Notifications",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .iter()
            .copied()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| format!("Unknown table: {}", s))
    }
}

// ============================================================================
// ROLES
// ============================================================================

/// Dashboard roles. Role names arrive in many spellings ("Technical
/// Director", "technical_director", "TD"); compare them through
/// [`normalize_role_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    ProjectManager,
    Estimator,
    SiteEngineer,
    TechnicalDirector,
    Admin,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Buyer,
        Role::ProjectManager,
        Role::Estimator,
        Role::SiteEngineer,
        Role::TechnicalDirector,
        Role::Admin,
    ];

    /// Canonical normalized token for this role.
    pub fn canonical(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::ProjectManager => "projectmanager",
            Role::Estimator => "estimator",
            Role::SiteEngineer => "siteengineer",
            Role::TechnicalDirector => "technicaldirector",
            Role::Admin => "admin",
        }
    }

    /// Slug used for socket room names (`role_<slug>`).
    pub fn slug(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::ProjectManager => "project_manager",
            Role::Estimator => "estimator",
            Role::SiteEngineer => "site_engineer",
            Role::TechnicalDirector => "technical_director",
            Role::Admin => "admin",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Buyer => "Buyer",
            Role::ProjectManager => "Project Manager",
            Role::Estimator => "Estimator",
            Role::SiteEngineer => "Site Engineer",
            Role::TechnicalDirector => "Technical Director",
            Role::Admin => "Admin",
        }
    }

    /// Resolve any spelling of a role name.
    pub fn parse_loose(name: &str) -> Option<Role> {
        let normalized = normalize_role_name(name);
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.canonical() == normalized)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::parse_loose(s).ok_or_else(|| format!("Unknown role: {}", s))
    }
}

/// Lowercase, drop separators and whitespace, then expand known aliases.
pub fn normalize_role_name(name: &str) -> String {
    let compact: String = name
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    match compact.as_str() {
        "td" | "director" => "technicaldirector".to_string(),
        "pm" | "projectmanagement" => "projectmanager".to_string(),
        "se" | "sitesupervisor" | "sitesupervisorengineer" => "siteengineer".to_string(),
        "procurement" | "purchaser" => "buyer".to_string(),
        "estimation" | "estimations" => "estimator".to_string(),
        "administrator" | "superadmin" => "admin".to_string(),
        _ => compact,
    }
}

/// True when both names refer to the same role after normalization.
pub fn roles_match(a: &str, b: &str) -> bool {
    let a = normalize_role_name(a);
    !a.is_empty() && a == normalize_role_name(b)
}

// ============================================================================
// BOQ STATUS
// ============================================================================

/// Lifecycle of a Bill of Quantities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BoqStatus {
    Draft,
    PendingTdApproval,
    Approved,
    Rejected,
    SentForConfirmation,
    ClientConfirmed,
    ClientRejected,
    UnderRevision,
    RevisionApproved,
    Completed,
    Other(String),
}

impl BoqStatus {
    /// Parse the backend's free-form status string.
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "draft" => Self::Draft,
            "pending" | "pending_td_approval" | "pending_approval" => Self::PendingTdApproval,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "sent_for_confirmation" | "sent_to_client" => Self::SentForConfirmation,
            "client_confirmed" => Self::ClientConfirmed,
            "client_rejected" => Self::ClientRejected,
            "under_revision" | "revision" => Self::UnderRevision,
            "revision_approved" => Self::RevisionApproved,
            "completed" => Self::Completed,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Draft => "Draft",
            Self::PendingTdApproval => "Pending_TD_Approval",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::SentForConfirmation => "Sent_for_Confirmation",
            Self::ClientConfirmed => "Client_Confirmed",
            Self::ClientRejected => "Client_Rejected",
            Self::UnderRevision => "Under_Revision",
            Self::RevisionApproved => "Revision_Approved",
            Self::Completed => "Completed",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for BoqStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<BoqStatus> for String {
    fn from(status: BoqStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for BoqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
