use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::role::Role;
use super::scope::ConsentScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Doctor,
    Hospital,
    Pharmacy,
    Lab,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Doctor => "doctor",
            ProviderType::Hospital => "hospital",
            ProviderType::Pharmacy => "pharmacy",
            ProviderType::Lab => "lab",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doctor" => Ok(ProviderType::Doctor),
            "hospital" => Ok(ProviderType::Hospital),
            "pharmacy" => Ok(ProviderType::Pharmacy),
            "lab" => Ok(ProviderType::Lab),
            other => Err(format!("unknown provider type: {}", other)),
        }
    }
}

impl From<ProviderType> for Role {
    fn from(provider: ProviderType) -> Self {
        match provider {
            ProviderType::Doctor => Role::Doctor,
            ProviderType::Hospital => Role::Hospital,
            ProviderType::Pharmacy => Role::Pharmacy,
            ProviderType::Lab => Role::Lab,
        }
    }
}

/// GRANTED is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsentStatus {
    Granted,
    Revoked,
    Expired,
}

impl ConsentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentStatus::Granted => "GRANTED",
            ConsentStatus::Revoked => "REVOKED",
            ConsentStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConsentStatus::Granted)
    }
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GRANTED" => Ok(ConsentStatus::Granted),
            "REVOKED" => Ok(ConsentStatus::Revoked),
            "EXPIRED" => Ok(ConsentStatus::Expired),
            other => Err(format!("unknown consent status: {}", other)),
        }
    }
}

/// Natural key of a consent: one patient toward one provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsentKey {
    pub patient_id: String,
    pub provider_id: String,
}

impl ConsentKey {
    pub fn new(patient_id: &str, provider_id: &str) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            provider_id: provider_id.to_string(),
        }
    }
}

impl fmt::Display for ConsentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.patient_id, self.provider_id)
    }
}

/// A patient's standing authorization toward one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consent {
    pub id: Uuid,
    pub patient_id: String,
    pub granted_to: String,
    pub granted_to_type: ProviderType,
    pub status: ConsentStatus,
    pub scope: ConsentScope,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Consent {
    pub fn new(request: &GrantRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id: request.patient_id.clone(),
            granted_to: request.granted_to.clone(),
            granted_to_type: request.granted_to_type,
            status: ConsentStatus::Granted,
            scope: request.scope,
            expires_at: request.expires_at,
            created_at: now,
            updated_at: now,
            revoked_at: None,
        }
    }

    pub fn key(&self) -> ConsentKey {
        ConsentKey::new(&self.patient_id, &self.granted_to)
    }

    pub fn is_granted(&self) -> bool {
        self.status == ConsentStatus::Granted
    }

    /// The expiry instant has been reached. Says nothing about status.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Granted and not lapsed.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.is_granted() && !self.is_lapsed(now)
    }

    pub fn apply(&mut self, update: &ConsentUpdate, now: DateTime<Utc>) {
        if let Some(scope) = update.scope {
            self.scope = scope;
        }
        match update.expires_at {
            ExpiryUpdate::Keep => {}
            ExpiryUpdate::Clear => self.expires_at = None,
            ExpiryUpdate::Set(at) => self.expires_at = Some(at),
        }
        self.updated_at = now;
    }

    pub fn mark_revoked(&mut self, now: DateTime<Utc>) {
        self.status = ConsentStatus::Revoked;
        self.revoked_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_expired(&mut self, now: DateTime<Utc>) {
        self.status = ConsentStatus::Expired;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub patient_id: String,
    pub granted_to: String,
    pub granted_to_type: ProviderType,
    pub scope: ConsentScope,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GrantRequest {
    pub fn key(&self) -> ConsentKey {
        ConsentKey::new(&self.patient_id, &self.granted_to)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpiryUpdate {
    #[default]
    Keep,
    Clear,
    Set(DateTime<Utc>),
}

impl From<Option<DateTime<Utc>>> for ExpiryUpdate {
    fn from(at: Option<DateTime<Utc>>) -> Self {
        match at {
            Some(at) => ExpiryUpdate::Set(at),
            None => ExpiryUpdate::Clear,
        }
    }
}

/// Partial edit of a consent; fields left unset are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsentUpdate {
    pub scope: Option<ConsentScope>,
    pub expires_at: ExpiryUpdate,
}

/// Outcome of an access decision.
///
/// `consent` may be present even when access is denied, so the caller can
/// explain which categories are missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentCheck {
    pub has_consent: bool,
    pub consent: Option<Consent>,
}

impl ConsentCheck {
    pub fn denied() -> Self {
        Self {
            has_consent: false,
            consent: None,
        }
    }
}
