//! PostgreSQL stores.
//!
//! The single-active-grant invariant is enforced by the partial unique
//! index `consents_one_active` (see `migrations/`); status transitions are
//! compare-and-set on the `status` column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{AuditStore, ConsentStore, PatientDirectory, StoreError, StoreResult};
use crate::models::{AccessLog, Consent, ConsentScope, ConsentStatus, Patient};

const CONSENT_COLUMNS: &str = "id, patient_id, granted_to, granted_to_type, status, \
     view_diagnosis, view_medications, view_lab_results, view_allergies, view_full_history, \
     expires_at, created_at, updated_at, revoked_at";

#[derive(FromRow)]
struct ConsentRow {
    id: Uuid,
    patient_id: String,
    granted_to: String,
    granted_to_type: String,
    status: String,
    view_diagnosis: bool,
    view_medications: bool,
    view_lab_results: bool,
    view_allergies: bool,
    view_full_history: bool,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

impl TryFrom<ConsentRow> for Consent {
    type Error = StoreError;

    fn try_from(row: ConsentRow) -> Result<Self, Self::Error> {
        Ok(Consent {
            id: row.id,
            patient_id: row.patient_id,
            granted_to: row.granted_to,
            granted_to_type: row.granted_to_type.parse().map_err(StoreError::Corrupt)?,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            scope: ConsentScope {
                view_diagnosis: row.view_diagnosis,
                view_medications: row.view_medications,
                view_lab_results: row.view_lab_results,
                view_allergies: row.view_allergies,
                view_full_history: row.view_full_history,
            },
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            revoked_at: row.revoked_at,
        })
    }
}

fn into_consents(rows: Vec<ConsentRow>) -> StoreResult<Vec<Consent>> {
    rows.into_iter().map(Consent::try_from).collect()
}

fn map_unique_violation(err: sqlx::Error, what: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(format!("active grant exists for {}", what))
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::Database(err),
    }
}

pub struct PgConsentStore {
    pool: PgPool,
}

impl PgConsentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConsentStore for PgConsentStore {
    async fn find_active_grant(
        &self,
        patient_id: &str,
        provider_id: &str,
    ) -> StoreResult<Option<Consent>> {
        let sql = format!(
            "SELECT {} FROM consents WHERE patient_id = $1 AND granted_to = $2 AND status = 'GRANTED'",
            CONSENT_COLUMNS
        );
        let row: Option<ConsentRow> = sqlx::query_as(&sql)
            .bind(patient_id)
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Consent::try_from).transpose()
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Consent>> {
        let sql = format!("SELECT {} FROM consents WHERE id = $1", CONSENT_COLUMNS);
        let row: Option<ConsentRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Consent::try_from).transpose()
    }

    async fn list_active_for_patient(&self, patient_id: &str) -> StoreResult<Vec<Consent>> {
        let sql = format!(
            "SELECT {} FROM consents WHERE patient_id = $1 AND status = 'GRANTED' \
             ORDER BY created_at DESC, id DESC",
            CONSENT_COLUMNS
        );
        let rows: Vec<ConsentRow> = sqlx::query_as(&sql)
            .bind(patient_id)
            .fetch_all(&self.pool)
            .await?;
        into_consents(rows)
    }

    async fn list_for_patient(&self, patient_id: &str) -> StoreResult<Vec<Consent>> {
        let sql = format!(
            "SELECT {} FROM consents WHERE patient_id = $1 ORDER BY created_at DESC, id DESC",
            CONSENT_COLUMNS
        );
        let rows: Vec<ConsentRow> = sqlx::query_as(&sql)
            .bind(patient_id)
            .fetch_all(&self.pool)
            .await?;
        into_consents(rows)
    }

    async fn insert(&self, consent: &Consent) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO consents ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            CONSENT_COLUMNS
        );
        sqlx::query(&sql)
            .bind(consent.id)
            .bind(&consent.patient_id)
            .bind(&consent.granted_to)
            .bind(consent.granted_to_type.as_str())
            .bind(consent.status.as_str())
            .bind(consent.scope.view_diagnosis)
            .bind(consent.scope.view_medications)
            .bind(consent.scope.view_lab_results)
            .bind(consent.scope.view_allergies)
            .bind(consent.scope.view_full_history)
            .bind(consent.expires_at)
            .bind(consent.created_at)
            .bind(consent.updated_at)
            .bind(consent.revoked_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, &consent.key().to_string()))?;
        Ok(())
    }

    async fn update(&self, consent: &Consent, expected: ConsentStatus) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE consents SET granted_to_type = $3, status = $4, \
             view_diagnosis = $5, view_medications = $6, view_lab_results = $7, \
             view_allergies = $8, view_full_history = $9, \
             expires_at = $10, updated_at = $11, revoked_at = $12 \
             WHERE id = $1 AND status = $2",
        )
        .bind(consent.id)
        .bind(expected.as_str())
        .bind(consent.granted_to_type.as_str())
        .bind(consent.status.as_str())
        .bind(consent.scope.view_diagnosis)
        .bind(consent.scope.view_medications)
        .bind(consent.scope.view_lab_results)
        .bind(consent.scope.view_allergies)
        .bind(consent.scope.view_full_history)
        .bind(consent.expires_at)
        .bind(consent.updated_at)
        .bind(consent.revoked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, &consent.key().to_string()))?;
        Ok(result.rows_affected() == 1)
    }

    async fn lapsed_grants(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Consent>> {
        let sql = format!(
            "SELECT {} FROM consents WHERE status = 'GRANTED' AND expires_at IS NOT NULL \
             AND expires_at <= $1 ORDER BY expires_at LIMIT $2",
            CONSENT_COLUMNS
        );
        let rows: Vec<ConsentRow> = sqlx::query_as(&sql)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        into_consents(rows)
    }
}

#[derive(FromRow)]
struct AccessLogRow {
    id: Uuid,
    patient_id: String,
    accessed_by: String,
    accessed_by_role: String,
    action: String,
    data_accessed: Vec<String>,
    is_emergency_access: bool,
    ip_address: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccessLogRow> for AccessLog {
    type Error = StoreError;

    fn try_from(row: AccessLogRow) -> Result<Self, Self::Error> {
        Ok(AccessLog {
            id: row.id,
            patient_id: row.patient_id,
            accessed_by: row.accessed_by,
            accessed_by_role: row.accessed_by_role.parse().map_err(StoreError::Corrupt)?,
            action: row.action,
            data_accessed: row.data_accessed,
            is_emergency_access: row.is_emergency_access,
            ip_address: row.ip_address,
            created_at: row.created_at,
        })
    }
}

/// Insert-only; the table has no UPDATE or DELETE path in this crate.
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, entry: &AccessLog) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO access_logs (id, patient_id, accessed_by, accessed_by_role, action, \
             data_accessed, is_emergency_access, ip_address, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(entry.id)
        .bind(&entry.patient_id)
        .bind(&entry.accessed_by)
        .bind(entry.accessed_by_role.as_str())
        .bind(&entry.action)
        .bind(&entry.data_accessed)
        .bind(entry.is_emergency_access)
        .bind(&entry.ip_address)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_patient(
        &self,
        patient_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<AccessLog>> {
        let rows: Vec<AccessLogRow> = sqlx::query_as(
            "SELECT id, patient_id, accessed_by, accessed_by_role, action, data_accessed, \
             is_emergency_access, ip_address, created_at FROM access_logs \
             WHERE patient_id = $1 \
             AND ($2::timestamptz IS NULL OR created_at >= $2) \
             AND ($3::timestamptz IS NULL OR created_at <= $3) \
             ORDER BY created_at DESC, seq DESC",
        )
        .bind(patient_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AccessLog::try_from).collect()
    }
}

pub struct PgPatientDirectory {
    pool: PgPool,
}

impl PgPatientDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PatientDirectory for PgPatientDirectory {
    async fn get_patient_by_id(&self, id: &str) -> StoreResult<Option<Patient>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT id, name FROM patients WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name)| Patient { id, name }))
    }
}
