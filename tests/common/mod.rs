//! Shared harness for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use consentguard::config::Config;
use consentguard::models::{
    AccessLog, Actor, Consent, ConsentScope, ConsentStatus, DataCategory, GrantRequest, Patient,
    ProviderType, Role,
};
use consentguard::repository::{
    AuditStore, ConsentStore, InMemoryAuditStore, InMemoryConsentStore, InMemoryPatientDirectory,
    PatientDirectory, StoreError, StoreResult,
};
use consentguard::services::{ConsentService, Stores};
use consentguard::ManualClock;

/// Consent store that can fail writes or yield between operations.
#[derive(Default)]
pub struct FlakyConsentStore {
    pub inner: InMemoryConsentStore,
    pub fail_updates: AtomicBool,
    pub fail_inserts: AtomicBool,
    pub yield_on_read: AtomicBool,
    pub updates: AtomicUsize,
    /// Number of upcoming inserts to reject as if another writer won.
    pub conflicting_inserts: AtomicUsize,
}

impl FlakyConsentStore {
    pub fn granted_for(&self, patient_id: &str, provider_id: &str) -> Vec<Consent> {
        self.inner
            .snapshot()
            .into_iter()
            .filter(|c| c.patient_id == patient_id && c.granted_to == provider_id)
            .filter(|c| c.status == ConsentStatus::Granted)
            .collect()
    }
}

#[async_trait]
impl ConsentStore for FlakyConsentStore {
    async fn find_active_grant(
        &self,
        patient_id: &str,
        provider_id: &str,
    ) -> StoreResult<Option<Consent>> {
        let found = self.inner.find_active_grant(patient_id, provider_id).await?;
        if self.yield_on_read.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        Ok(found)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Consent>> {
        self.inner.get_by_id(id).await
    }

    async fn list_active_for_patient(&self, patient_id: &str) -> StoreResult<Vec<Consent>> {
        self.inner.list_active_for_patient(patient_id).await
    }

    async fn list_for_patient(&self, patient_id: &str) -> StoreResult<Vec<Consent>> {
        self.inner.list_for_patient(patient_id).await
    }

    async fn insert(&self, consent: &Consent) -> StoreResult<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("insert failed".to_string()));
        }
        let forced_conflict = self
            .conflicting_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced_conflict {
            return Err(StoreError::Conflict(format!("active grant exists for {}", consent.key())));
        }
        self.inner.insert(consent).await
    }

    async fn update(&self, consent: &Consent, expected: ConsentStatus) -> StoreResult<bool> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("update failed".to_string()));
        }
        self.inner.update(consent, expected).await
    }

    async fn lapsed_grants(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Consent>> {
        self.inner.lapsed_grants(now, limit).await
    }
}

#[derive(Default)]
pub struct FlakyAuditStore {
    pub inner: InMemoryAuditStore,
    pub fail_appends: AtomicBool,
}

impl FlakyAuditStore {
    pub fn entries(&self) -> Vec<AccessLog> {
        self.inner.snapshot()
    }
}

#[async_trait]
impl AuditStore for FlakyAuditStore {
    async fn append(&self, entry: &AccessLog) -> StoreResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit store offline".to_string()));
        }
        self.inner.append(entry).await
    }

    async fn list_for_patient(
        &self,
        patient_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<AccessLog>> {
        self.inner.list_for_patient(patient_id, start, end).await
    }
}

/// Directory whose lookups panic, standing in for a bug below the services.
pub struct PanickingDirectory;

#[async_trait]
impl PatientDirectory for PanickingDirectory {
    async fn get_patient_by_id(&self, id: &str) -> StoreResult<Option<Patient>> {
        panic!("directory lookup for {} blew up", id);
    }
}

pub struct Harness {
    pub service: ConsentService,
    pub consents: Arc<FlakyConsentStore>,
    pub audit: Arc<FlakyAuditStore>,
    pub patients: Arc<InMemoryPatientDirectory>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// A second engine over the same stores, as another process would be.
    /// It shares no in-process locks with `service`.
    pub fn sibling_service(&self) -> ConsentService {
        let stores = Stores {
            consents: self.consents.clone(),
            audit: self.audit.clone(),
            patients: self.patients.clone(),
        };
        ConsentService::new(stores, self.clock.clone(), &Config::default())
    }

    /// An engine over the same stores whose patient lookups panic.
    pub fn service_with_broken_directory(&self) -> ConsentService {
        let stores = Stores {
            consents: self.consents.clone(),
            audit: self.audit.clone(),
            patients: Arc::new(PanickingDirectory),
        };
        ConsentService::new(stores, self.clock.clone(), &Config::default())
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub fn harness() -> Harness {
    harness_with_config(Config::default())
}

pub fn harness_with_config(config: Config) -> Harness {
    let consents = Arc::new(FlakyConsentStore::default());
    let audit = Arc::new(FlakyAuditStore::default());
    let clock = Arc::new(ManualClock::new(epoch()));
    let patients = Arc::new(InMemoryPatientDirectory::with_patients([
        Patient::new("P1", "Ada Lovelace"),
        Patient::new("P2", "Alan Turing"),
    ]));

    let stores = Stores {
        consents: consents.clone(),
        audit: audit.clone(),
        patients: patients.clone(),
    };
    let service = ConsentService::new(stores, clock.clone(), &config);

    Harness {
        service,
        consents,
        audit,
        patients,
        clock,
    }
}

pub fn patient(id: &str) -> Actor {
    Actor::patient(id)
}

pub fn doctor(id: &str) -> Actor {
    Actor::new(id, Role::Doctor)
}

pub fn hospital(id: &str) -> Actor {
    Actor::new(id, Role::Hospital)
}

pub fn admin() -> Actor {
    Actor::new("ADMIN1", Role::Admin)
}

pub fn grant(patient_id: &str, provider_id: &str, scope: ConsentScope) -> GrantRequest {
    GrantRequest {
        patient_id: patient_id.to_string(),
        granted_to: provider_id.to_string(),
        granted_to_type: ProviderType::Doctor,
        scope,
        expires_at: None,
    }
}

pub fn diagnosis_only() -> ConsentScope {
    ConsentScope::only(DataCategory::Diagnosis)
}
