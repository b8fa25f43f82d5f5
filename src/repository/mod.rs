//! Persistence boundary for consents, access logs and the patient directory.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{AccessLog, Consent, ConsentStatus, Patient};

pub use memory::{InMemoryAuditStore, InMemoryConsentStore, InMemoryPatientDirectory};
pub use postgres::{PgAuditStore, PgConsentStore, PgPatientDirectory};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A GRANTED record already exists for the key being inserted.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ConsentStore: Send + Sync {
    /// The single GRANTED record for the pair, if any. Lapsed records are
    /// still returned; expiry is decided by the caller.
    async fn find_active_grant(
        &self,
        patient_id: &str,
        provider_id: &str,
    ) -> StoreResult<Option<Consent>>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Consent>>;

    async fn list_active_for_patient(&self, patient_id: &str) -> StoreResult<Vec<Consent>>;

    /// Every record for the patient, newest first.
    async fn list_for_patient(&self, patient_id: &str) -> StoreResult<Vec<Consent>>;

    /// Persist a new record. Fails with [`StoreError::Conflict`] when the
    /// record is GRANTED and another GRANTED record exists for its key.
    async fn insert(&self, consent: &Consent) -> StoreResult<()>;

    /// Replace the stored record only if its status is still `expected`.
    /// Returns `false` when the record is missing or its status moved.
    async fn update(&self, consent: &Consent, expected: ConsentStatus) -> StoreResult<bool>;

    /// GRANTED records whose expiry is at or before `now`.
    async fn lapsed_grants(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Consent>>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: &AccessLog) -> StoreResult<()>;

    /// Entries for the patient within the inclusive range, newest first.
    async fn list_for_patient(
        &self,
        patient_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<AccessLog>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn get_patient_by_id(&self, id: &str) -> StoreResult<Option<Patient>>;
}
