//! Caller roles and the single permission predicate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Hospital,
    Pharmacy,
    Lab,
    Patient,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Hospital => "hospital",
            Role::Pharmacy => "pharmacy",
            Role::Lab => "lab",
            Role::Patient => "patient",
            Role::Admin => "admin",
        }
    }

    pub fn is_provider(&self) -> bool {
        PROVIDERS.contains(self)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doctor" => Ok(Role::Doctor),
            "hospital" => Ok(Role::Hospital),
            "pharmacy" => Ok(Role::Pharmacy),
            "lab" => Ok(Role::Lab),
            "patient" => Ok(Role::Patient),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GrantConsent,
    UpdateConsent,
    RevokeConsent,
    CheckConsent,
    ViewConsents,
    ViewAccessLogs,
    GrantEmergencyAccess,
    LogAccess,
}

const PROVIDERS: &[Role] = &[Role::Doctor, Role::Hospital, Role::Pharmacy, Role::Lab];

const GRANTORS: &[Role] = &[
    Role::Patient,
    Role::Admin,
    Role::Doctor,
    Role::Hospital,
    Role::Pharmacy,
    Role::Lab,
];

const CHECKERS: &[Role] = &[
    Role::Doctor,
    Role::Hospital,
    Role::Pharmacy,
    Role::Lab,
    Role::Admin,
];

const OWNER_VIEWS: &[Role] = &[Role::Patient, Role::Admin];

const EMERGENCY_RESPONDERS: &[Role] = &[Role::Doctor, Role::Hospital];

fn allowed_roles(operation: Operation) -> &'static [Role] {
    match operation {
        Operation::GrantConsent => GRANTORS,
        Operation::UpdateConsent | Operation::RevokeConsent => &[Role::Patient],
        Operation::CheckConsent | Operation::LogAccess => CHECKERS,
        Operation::ViewConsents | Operation::ViewAccessLogs => OWNER_VIEWS,
        Operation::GrantEmergencyAccess => EMERGENCY_RESPONDERS,
    }
}

/// Whether `role` may invoke `operation` at all. Ownership is checked
/// separately by the service layer.
pub fn can_act(role: Role, operation: Operation) -> bool {
    allowed_roles(operation).contains(&role)
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: &str, role: Role) -> Self {
        Self {
            id: id.to_string(),
            role,
        }
    }

    pub fn patient(id: &str) -> Self {
        Self::new(id, Role::Patient)
    }

    pub fn can(&self, operation: Operation) -> bool {
        can_act(self.role, operation)
    }
}
