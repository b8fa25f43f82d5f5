//! Grant, update, revoke and expire consents.
//!
//! Every check-then-act sequence on a `(patient, provider)` pair runs under
//! that pair's [`KeyedLocks`] guard. Status changes are compare-and-set
//! against GRANTED, so a terminal status is never overwritten.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::lock_manager::KeyedLocks;
use crate::clock::Clock;
use crate::error::{ConsentError, ConsentResult};
use crate::models::{
    Consent, ConsentScope, ConsentStatus, ConsentUpdate, GrantRequest, ProviderType,
};
use crate::repository::{ConsentStore, PatientDirectory, StoreResult};

pub const DEFAULT_FULL_CONSENT_HOURS: u32 = 24;

pub struct ConsentLifecycle {
    store: Arc<dyn ConsentStore>,
    patients: Arc<dyn PatientDirectory>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyedLocks>,
    default_full_hours: u32,
}

impl ConsentLifecycle {
    pub fn new(
        store: Arc<dyn ConsentStore>,
        patients: Arc<dyn PatientDirectory>,
        clock: Arc<dyn Clock>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            store,
            patients,
            clock,
            locks,
            default_full_hours: DEFAULT_FULL_CONSENT_HOURS,
        }
    }

    pub fn with_default_full_hours(mut self, hours: u32) -> Self {
        self.default_full_hours = hours;
        self
    }

    pub(crate) fn locks(&self) -> &Arc<KeyedLocks> {
        &self.locks
    }

    /// Pairs that currently hold or wait on a lock.
    pub fn active_lock_count(&self) -> usize {
        self.locks.active_keys()
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Create a consent, or widen/narrow the existing active one in place.
    ///
    /// Repeated grants for the same pair keep the original id and creation
    /// time. A past `expires_at` is accepted; the record simply reads as
    /// expired.
    pub async fn grant_consent(&self, request: GrantRequest) -> ConsentResult<Consent> {
        validate_request(&request)?;
        self.ensure_patient(&request.patient_id).await?;

        let _guard = self.locks.acquire(&request.key()).await;
        let now = self.clock.now();
        self.upsert_locked(&request, now).await
    }

    /// Full-scope grant lasting `duration_hours` (default from config).
    pub async fn grant_full_consent(
        &self,
        patient_id: &str,
        provider_id: &str,
        provider_type: ProviderType,
        duration_hours: Option<u32>,
    ) -> ConsentResult<Consent> {
        let hours = duration_hours.unwrap_or(self.default_full_hours);
        let request = full_grant_request(
            patient_id,
            provider_id,
            provider_type,
            hours,
            self.clock.now(),
        )?;
        self.grant_consent(request).await
    }

    /// Revoke a consent owned by `patient_id`.
    pub async fn revoke_consent(&self, patient_id: &str, consent_id: Uuid) -> ConsentResult<Consent> {
        let consent = self.load(consent_id).await?;
        if consent.patient_id != patient_id {
            tracing::warn!(
                consent_id = %consent_id,
                requested_by = %patient_id,
                "Revoke attempted on consent owned by another patient"
            );
            return Err(ConsentError::forbidden(
                "only the owning patient may revoke a consent",
            ));
        }

        let _guard = self.locks.acquire(&consent.key()).await;
        let mut current = self.load(consent_id).await?;
        if !current.is_granted() {
            return Err(ConsentError::bad_request(format!(
                "consent {} is already {}",
                consent_id, current.status
            )));
        }

        current.mark_revoked(self.clock.now());
        if !self.store.update(&current, ConsentStatus::Granted).await? {
            return Err(ConsentError::bad_request(format!(
                "consent {} is no longer granted",
                consent_id
            )));
        }

        tracing::info!(
            consent_id = %current.id,
            patient_id = %current.patient_id,
            granted_to = %current.granted_to,
            "Consent revoked"
        );
        Ok(current)
    }

    /// Merge `update` onto a GRANTED consent. Status is never changed here.
    pub async fn update_consent(
        &self,
        consent_id: Uuid,
        update: ConsentUpdate,
    ) -> ConsentResult<Consent> {
        let consent = self.load(consent_id).await?;
        let _guard = self.locks.acquire(&consent.key()).await;

        let mut current = self.load(consent_id).await?;
        let now = self.clock.now();
        if !current.is_granted() {
            return Err(ConsentError::bad_request(format!(
                "consent {} is {} and cannot be edited",
                consent_id, current.status
            )));
        }
        if current.is_lapsed(now) {
            expire_best_effort(self.store.as_ref(), &current, now).await;
            return Err(ConsentError::bad_request(format!(
                "consent {} has expired",
                consent_id
            )));
        }

        current.apply(&update, now);
        if !self.store.update(&current, ConsentStatus::Granted).await? {
            return Err(ConsentError::bad_request(format!(
                "consent {} is no longer granted",
                consent_id
            )));
        }

        tracing::info!(consent_id = %current.id, "Consent updated");
        Ok(current)
    }

    pub async fn get_consent(&self, consent_id: Uuid) -> ConsentResult<Consent> {
        self.load(consent_id).await
    }

    /// Currently active consents. Lapsed grants found on the way are flipped
    /// to EXPIRED and left out.
    pub async fn get_patient_consents(&self, patient_id: &str) -> ConsentResult<Vec<Consent>> {
        let now = self.clock.now();
        let mut active = Vec::new();
        for consent in self.store.list_active_for_patient(patient_id).await? {
            if consent.is_lapsed(now) {
                expire_best_effort(self.store.as_ref(), &consent, now).await;
            } else {
                active.push(consent);
            }
        }
        Ok(active)
    }

    /// Every consent the patient ever issued, newest first.
    pub async fn get_consent_history(&self, patient_id: &str) -> ConsentResult<Vec<Consent>> {
        Ok(self.store.list_for_patient(patient_id).await?)
    }

    /// Flip up to `limit` lapsed grants to EXPIRED. Returns how many flipped.
    pub async fn expire_lapsed(&self, limit: usize) -> ConsentResult<usize> {
        let now = self.clock.now();
        let mut flipped = 0;
        for consent in self.store.lapsed_grants(now, limit).await? {
            if expire(self.store.as_ref(), &consent, now).await? {
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    pub(crate) async fn ensure_patient(&self, patient_id: &str) -> ConsentResult<()> {
        match self.patients.get_patient_by_id(patient_id).await? {
            Some(_) => Ok(()),
            None => Err(ConsentError::not_found(format!("patient {}", patient_id))),
        }
    }

    /// Upsert for a pair whose lock the caller already holds.
    pub(crate) async fn upsert_locked(
        &self,
        request: &GrantRequest,
        now: DateTime<Utc>,
    ) -> ConsentResult<Consent> {
        match self.try_upsert(request, now).await {
            Err(e) if e.is_conflict() => {
                // Another process inserted between our read and write.
                tracing::warn!(
                    patient_id = %request.patient_id,
                    granted_to = %request.granted_to,
                    "Concurrent grant detected, retrying upsert"
                );
                Ok(self.try_upsert(request, now).await?)
            }
            other => Ok(other?),
        }
    }

    async fn try_upsert(&self, request: &GrantRequest, now: DateTime<Utc>) -> StoreResult<Consent> {
        if let Some(mut existing) = self
            .store
            .find_active_grant(&request.patient_id, &request.granted_to)
            .await?
        {
            if existing.is_lapsed(now) {
                // An expired authorization is never revived; start a new one.
                expire(self.store.as_ref(), &existing, now).await?;
            } else {
                existing.granted_to_type = request.granted_to_type;
                existing.apply(
                    &ConsentUpdate {
                        scope: Some(request.scope),
                        expires_at: request.expires_at.into(),
                    },
                    now,
                );
                if self.store.update(&existing, ConsentStatus::Granted).await? {
                    tracing::info!(
                        consent_id = %existing.id,
                        patient_id = %existing.patient_id,
                        granted_to = %existing.granted_to,
                        "Consent re-granted"
                    );
                    return Ok(existing);
                }
            }
        }

        let consent = Consent::new(request, now);
        self.store.insert(&consent).await?;
        tracing::info!(
            consent_id = %consent.id,
            patient_id = %consent.patient_id,
            granted_to = %consent.granted_to,
            granted_to_type = %consent.granted_to_type,
            "Consent granted"
        );
        Ok(consent)
    }

    async fn load(&self, consent_id: Uuid) -> ConsentResult<Consent> {
        self.store
            .get_by_id(consent_id)
            .await?
            .ok_or_else(|| ConsentError::not_found(format!("consent {}", consent_id)))
    }
}

fn validate_request(request: &GrantRequest) -> ConsentResult<()> {
    if request.patient_id.trim().is_empty() {
        return Err(ConsentError::bad_request("patient id must not be empty"));
    }
    if request.granted_to.trim().is_empty() {
        return Err(ConsentError::bad_request("provider id must not be empty"));
    }
    Ok(())
}

pub(crate) fn full_grant_request(
    patient_id: &str,
    provider_id: &str,
    provider_type: ProviderType,
    duration_hours: u32,
    now: DateTime<Utc>,
) -> ConsentResult<GrantRequest> {
    if duration_hours == 0 {
        return Err(ConsentError::bad_request("duration must be at least one hour"));
    }
    let expires_at = now
        .checked_add_signed(Duration::hours(i64::from(duration_hours)))
        .ok_or_else(|| ConsentError::bad_request("duration out of range"))?;
    Ok(GrantRequest {
        patient_id: patient_id.to_string(),
        granted_to: provider_id.to_string(),
        granted_to_type: provider_type,
        scope: ConsentScope::full(),
        expires_at: Some(expires_at),
    })
}

/// GRANTED -> EXPIRED as a compare-and-set. `false` means the record had
/// already left GRANTED.
pub(crate) async fn expire(
    store: &dyn ConsentStore,
    consent: &Consent,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    let mut expired = consent.clone();
    expired.mark_expired(now);
    let flipped = store.update(&expired, ConsentStatus::Granted).await?;
    if flipped {
        tracing::info!(
            consent_id = %consent.id,
            patient_id = %consent.patient_id,
            granted_to = %consent.granted_to,
            "Consent expired"
        );
    }
    Ok(flipped)
}

/// Like [`expire`], but a storage failure is only logged. The caller has
/// already decided the consent is unusable.
pub(crate) async fn expire_best_effort(
    store: &dyn ConsentStore,
    consent: &Consent,
    now: DateTime<Utc>,
) {
    if let Err(e) = expire(store, consent, now).await {
        tracing::warn!(
            consent_id = %consent.id,
            error = %e,
            "Failed to persist consent expiry"
        );
    }
}
