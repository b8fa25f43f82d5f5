//! Break-glass access for patients who cannot consent in time.
//!
//! The override grants a short full-scope consent and always writes an
//! emergency audit entry. The audit entry is written first: if it cannot be
//! persisted no consent is granted.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::audit::AuditLogger;
use super::lifecycle::{full_grant_request, ConsentLifecycle};
use crate::error::{ConsentError, ConsentResult};
use crate::models::{
    can_act, emergency_action, AccessLog, Consent, ConsentKey, NewAccessLog, Operation,
    ProviderType, Role, EMERGENCY_PROFILE, FULL_MEDICAL_HISTORY,
};
use crate::repository::StoreError;

pub const DEFAULT_EMERGENCY_HOURS: u32 = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyRequest {
    pub patient_id: String,
    pub provider_id: String,
    pub provider_type: ProviderType,
    pub provider_role: Role,
    pub reason: String,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyGrant {
    pub consent: Consent,
    pub access_log: AccessLog,
}

pub struct EmergencyOverride {
    lifecycle: Arc<ConsentLifecycle>,
    audit: Arc<AuditLogger>,
    duration_hours: u32,
}

impl EmergencyOverride {
    pub fn new(lifecycle: Arc<ConsentLifecycle>, audit: Arc<AuditLogger>) -> Self {
        Self {
            lifecycle,
            audit,
            duration_hours: DEFAULT_EMERGENCY_HOURS,
        }
    }

    pub fn with_duration_hours(mut self, hours: u32) -> Self {
        self.duration_hours = hours;
        self
    }

    /// Grant short-lived full access and record it as an emergency access.
    ///
    /// Overwrites any narrower active grant for the pair. Runs on its own
    /// task, so dropping the returned future does not abandon the operation
    /// between the audit write and the grant.
    pub async fn grant_emergency_access(
        &self,
        request: EmergencyRequest,
    ) -> ConsentResult<EmergencyGrant> {
        if request.reason.trim().is_empty() {
            return Err(ConsentError::bad_request("emergency access requires a reason"));
        }
        if !can_act(request.provider_role, Operation::GrantEmergencyAccess) {
            return Err(ConsentError::forbidden(format!(
                "role {} may not invoke emergency access",
                request.provider_role
            )));
        }

        let lifecycle = self.lifecycle.clone();
        let audit = self.audit.clone();
        let hours = self.duration_hours;
        let patient_id = request.patient_id.clone();
        let provider_id = request.provider_id.clone();

        tokio::spawn(async move { run_override(&lifecycle, &audit, hours, request).await })
            .await
            .map_err(|e| {
                tracing::error!(
                    patient_id = %patient_id,
                    provider_id = %provider_id,
                    panicked = e.is_panic(),
                    cancelled = e.is_cancelled(),
                    error = %e,
                    "Emergency override task did not complete"
                );
                ConsentError::Unavailable(StoreError::Unavailable(format!(
                    "emergency override task failed: {}",
                    e
                )))
            })?
    }
}

async fn run_override(
    lifecycle: &ConsentLifecycle,
    audit: &AuditLogger,
    hours: u32,
    request: EmergencyRequest,
) -> ConsentResult<EmergencyGrant> {
    lifecycle.ensure_patient(&request.patient_id).await?;

    let key = ConsentKey::new(&request.patient_id, &request.provider_id);
    let _guard = lifecycle.locks().acquire(&key).await;
    let now = lifecycle.clock().now();

    let grant = full_grant_request(
        &request.patient_id,
        &request.provider_id,
        request.provider_type,
        hours,
        now,
    )?;

    let entry = NewAccessLog::new(
        &request.patient_id,
        &request.provider_id,
        request.provider_role,
        &emergency_action(request.reason.trim()),
    )
    .data([EMERGENCY_PROFILE, FULL_MEDICAL_HISTORY])
    .ip(request.ip_address.clone())
    .emergency();

    let access_log = audit.log_access_at(entry, now).await?;

    let consent = match lifecycle.upsert_locked(&grant, now).await {
        Ok(consent) => consent,
        Err(e) => {
            tracing::error!(
                log_id = %access_log.id,
                patient_id = %request.patient_id,
                provider_id = %request.provider_id,
                code = e.code(),
                error = %e,
                "Emergency override audited but consent could not be granted"
            );
            return Err(e);
        }
    };

    tracing::warn!(
        consent_id = %consent.id,
        log_id = %access_log.id,
        patient_id = %request.patient_id,
        provider_id = %request.provider_id,
        role = %request.provider_role,
        reason = %request.reason.trim(),
        expires_at = ?consent.expires_at,
        "Emergency access granted"
    );

    Ok(EmergencyGrant {
        consent,
        access_log,
    })
}
