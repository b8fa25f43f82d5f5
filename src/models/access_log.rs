use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::role::Role;

pub const EMERGENCY_ACTION_PREFIX: &str = "EMERGENCY_ACCESS: ";
pub const EMERGENCY_PROFILE: &str = "emergency_profile";
pub const FULL_MEDICAL_HISTORY: &str = "full_medical_history";

/// Immutable audit record of one access decision or override.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLog {
    pub id: Uuid,
    pub patient_id: String,
    pub accessed_by: String,
    pub accessed_by_role: Role,
    pub action: String,
    pub data_accessed: Vec<String>,
    pub is_emergency_access: bool,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied part of an access log; the writer stamps id and time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccessLog {
    pub patient_id: String,
    pub accessed_by: String,
    pub accessed_by_role: Role,
    pub action: String,
    pub data_accessed: Vec<String>,
    pub is_emergency_access: bool,
    pub ip_address: Option<String>,
}

impl NewAccessLog {
    pub fn new(patient_id: &str, accessed_by: &str, role: Role, action: &str) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            accessed_by: accessed_by.to_string(),
            accessed_by_role: role,
            action: action.to_string(),
            data_accessed: Vec::new(),
            is_emergency_access: false,
            ip_address: None,
        }
    }

    pub fn data(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.data_accessed = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    pub fn emergency(mut self) -> Self {
        self.is_emergency_access = true;
        self
    }

    pub fn stamp(self, created_at: DateTime<Utc>) -> AccessLog {
        AccessLog {
            id: Uuid::new_v4(),
            patient_id: self.patient_id,
            accessed_by: self.accessed_by,
            accessed_by_role: self.accessed_by_role,
            action: self.action,
            data_accessed: self.data_accessed,
            is_emergency_access: self.is_emergency_access,
            ip_address: self.ip_address,
            created_at,
        }
    }
}

pub fn emergency_action(reason: &str) -> String {
    format!("{}{}", EMERGENCY_ACTION_PREFIX, reason)
}
