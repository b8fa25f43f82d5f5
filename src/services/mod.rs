pub mod audit;
pub mod decision;
pub mod emergency;
pub mod expiry_sweeper;
pub mod lifecycle;
pub mod lock_manager;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{database, Config};
use crate::error::{ConsentError, ConsentResult};
use crate::models::{
    AccessLog, Actor, Consent, ConsentCheck, ConsentUpdate, DataCategory, GrantRequest,
    NewAccessLog, Operation, ProviderType, Role,
};
use crate::repository::{
    AuditStore, ConsentStore, InMemoryAuditStore, InMemoryConsentStore, InMemoryPatientDirectory,
    PatientDirectory, PgAuditStore, PgConsentStore, PgPatientDirectory,
};

use self::audit::AuditLogger;
use self::decision::AccessDecisionEngine;
use self::emergency::{EmergencyGrant, EmergencyOverride, EmergencyRequest};
use self::expiry_sweeper::ExpirySweeper;
use self::lifecycle::ConsentLifecycle;
use self::lock_manager::KeyedLocks;

/// The storage collaborators the engine runs against.
#[derive(Clone)]
pub struct Stores {
    pub consents: Arc<dyn ConsentStore>,
    pub audit: Arc<dyn AuditStore>,
    pub patients: Arc<dyn PatientDirectory>,
}

impl Stores {
    pub fn in_memory(patients: InMemoryPatientDirectory) -> Self {
        Self {
            consents: Arc::new(InMemoryConsentStore::new()),
            audit: Arc::new(InMemoryAuditStore::new()),
            patients: Arc::new(patients),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            consents: Arc::new(PgConsentStore::new(pool.clone())),
            audit: Arc::new(PgAuditStore::new(pool.clone())),
            patients: Arc::new(PgPatientDirectory::new(pool)),
        }
    }

    /// Postgres when a database URL is configured, otherwise empty in-memory stores.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        match &config.database_url {
            Some(url) => {
                let pool = database::create_pool(url, config).await?;
                database::init_db(&pool).await?;
                tracing::info!("Using PostgreSQL consent store");
                Ok(Self::postgres(pool))
            }
            None => {
                tracing::warn!("No database configured, consents are held in memory only");
                Ok(Self::in_memory(InMemoryPatientDirectory::new()))
            }
        }
    }
}

/// Actor-checked entry points of the consent engine.
pub struct ConsentService {
    lifecycle: Arc<ConsentLifecycle>,
    decision: Arc<AccessDecisionEngine>,
    audit: Arc<AuditLogger>,
    emergency: Arc<EmergencyOverride>,
    sweep_interval: Duration,
    sweep_batch_size: usize,
}

impl ConsentService {
    pub fn new(stores: Stores, clock: Arc<dyn Clock>, config: &Config) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        let lifecycle = Arc::new(
            ConsentLifecycle::new(
                stores.consents.clone(),
                stores.patients.clone(),
                clock.clone(),
                locks,
            )
            .with_default_full_hours(config.default_full_consent_hours),
        );
        let decision = Arc::new(
            AccessDecisionEngine::new(stores.consents.clone(), clock.clone())
                .with_unscoped_policy(config.unscoped_policy),
        );
        let audit = Arc::new(AuditLogger::new(stores.audit.clone(), clock));
        let emergency = Arc::new(
            EmergencyOverride::new(lifecycle.clone(), audit.clone())
                .with_duration_hours(config.emergency_access_hours),
        );

        Self {
            lifecycle,
            decision,
            audit,
            emergency,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            sweep_batch_size: config.sweep_batch_size,
        }
    }

    pub fn lifecycle(&self) -> &Arc<ConsentLifecycle> {
        &self.lifecycle
    }

    pub fn decision(&self) -> &Arc<AccessDecisionEngine> {
        &self.decision
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn emergency(&self) -> &Arc<EmergencyOverride> {
        &self.emergency
    }

    /// `None` when the sweep interval is configured as zero.
    pub fn expiry_sweeper(&self) -> Option<ExpirySweeper> {
        if self.sweep_interval.is_zero() {
            return None;
        }
        Some(ExpirySweeper::new(
            self.lifecycle.clone(),
            self.sweep_interval,
            self.sweep_batch_size,
        ))
    }

    pub async fn grant_consent(
        &self,
        actor: &Actor,
        request: GrantRequest,
    ) -> ConsentResult<Consent> {
        require(actor, Operation::GrantConsent)?;
        ensure_may_grant(actor, &request.patient_id, &request.granted_to, request.granted_to_type)?;
        self.lifecycle.grant_consent(request).await
    }

    pub async fn grant_full_consent(
        &self,
        actor: &Actor,
        patient_id: &str,
        provider_id: &str,
        provider_type: ProviderType,
        duration_hours: Option<u32>,
    ) -> ConsentResult<Consent> {
        require(actor, Operation::GrantConsent)?;
        ensure_may_grant(actor, patient_id, provider_id, provider_type)?;
        self.lifecycle
            .grant_full_consent(patient_id, provider_id, provider_type, duration_hours)
            .await
    }

    pub async fn revoke_consent(&self, actor: &Actor, consent_id: Uuid) -> ConsentResult<Consent> {
        require(actor, Operation::RevokeConsent)?;
        self.lifecycle.revoke_consent(&actor.id, consent_id).await
    }

    pub async fn update_consent(
        &self,
        actor: &Actor,
        consent_id: Uuid,
        update: ConsentUpdate,
    ) -> ConsentResult<Consent> {
        require(actor, Operation::UpdateConsent)?;
        let consent = self.lifecycle.get_consent(consent_id).await?;
        ensure_owner(actor, &consent.patient_id)?;
        self.lifecycle.update_consent(consent_id, update).await
    }

    /// Providers may only ask about their own consent; admins about anyone's.
    pub async fn check_consent(
        &self,
        actor: &Actor,
        patient_id: &str,
        provider_id: &str,
        required: Option<DataCategory>,
    ) -> ConsentResult<ConsentCheck> {
        require(actor, Operation::CheckConsent)?;
        if actor.role != Role::Admin && actor.id != provider_id {
            return Err(ConsentError::forbidden(
                "providers may only check their own consent",
            ));
        }
        self.decision
            .check_consent(patient_id, provider_id, required)
            .await
    }

    pub async fn get_patient_consents(
        &self,
        actor: &Actor,
        patient_id: &str,
    ) -> ConsentResult<Vec<Consent>> {
        require(actor, Operation::ViewConsents)?;
        ensure_owner(actor, patient_id)?;
        self.lifecycle.get_patient_consents(patient_id).await
    }

    pub async fn get_consent_history(
        &self,
        actor: &Actor,
        patient_id: &str,
    ) -> ConsentResult<Vec<Consent>> {
        require(actor, Operation::ViewConsents)?;
        ensure_owner(actor, patient_id)?;
        self.lifecycle.get_consent_history(patient_id).await
    }

    pub async fn get_patient_access_logs(
        &self,
        actor: &Actor,
        patient_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> ConsentResult<Vec<AccessLog>> {
        require(actor, Operation::ViewAccessLogs)?;
        ensure_owner(actor, patient_id)?;
        self.audit.get_patient_access_logs(patient_id, start, end).await
    }

    pub async fn log_access(&self, actor: &Actor, entry: NewAccessLog) -> ConsentResult<AccessLog> {
        require(actor, Operation::LogAccess)?;
        if entry.accessed_by != actor.id || entry.accessed_by_role != actor.role {
            return Err(ConsentError::forbidden(
                "access logs must name the calling actor",
            ));
        }
        self.audit.log_access(entry).await
    }

    /// The calling provider claims emergency access for itself.
    pub async fn grant_emergency_access(
        &self,
        actor: &Actor,
        patient_id: &str,
        provider_type: ProviderType,
        reason: &str,
        ip_address: Option<String>,
    ) -> ConsentResult<EmergencyGrant> {
        require(actor, Operation::GrantEmergencyAccess)?;
        if Role::from(provider_type) != actor.role {
            return Err(ConsentError::forbidden(format!(
                "a {} may not claim emergency access as a {}",
                actor.role, provider_type
            )));
        }
        self.emergency
            .grant_emergency_access(EmergencyRequest {
                patient_id: patient_id.to_string(),
                provider_id: actor.id.clone(),
                provider_type,
                provider_role: actor.role,
                reason: reason.to_string(),
                ip_address,
            })
            .await
    }

    /// Check consent for the calling provider and, when granted, record the
    /// disclosure before answering. If the log cannot be written the read
    /// fails.
    pub async fn authorize_read(
        &self,
        actor: &Actor,
        patient_id: &str,
        required: Option<DataCategory>,
        action: &str,
        ip_address: Option<String>,
    ) -> ConsentResult<ConsentCheck> {
        require(actor, Operation::CheckConsent)?;
        require(actor, Operation::LogAccess)?;

        let check = self
            .decision
            .check_consent(patient_id, &actor.id, required)
            .await?;
        if !check.has_consent {
            return Ok(check);
        }

        let disclosed: Vec<String> = match (required, &check.consent) {
            (Some(category), _) => vec![category.label().to_string()],
            (None, Some(consent)) => consent
                .scope
                .categories()
                .iter()
                .map(|c| c.label().to_string())
                .collect(),
            (None, None) => Vec::new(),
        };

        self.audit
            .log_access(
                NewAccessLog::new(patient_id, &actor.id, actor.role, action)
                    .data(disclosed)
                    .ip(ip_address),
            )
            .await?;
        Ok(check)
    }
}

fn require(actor: &Actor, operation: Operation) -> ConsentResult<()> {
    if actor.can(operation) {
        Ok(())
    } else {
        tracing::warn!(
            actor_id = %actor.id,
            role = %actor.role,
            operation = ?operation,
            "Operation denied for role"
        );
        Err(ConsentError::forbidden(format!(
            "role {} may not perform {:?}",
            actor.role, operation
        )))
    }
}

fn ensure_owner(actor: &Actor, patient_id: &str) -> ConsentResult<()> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::Patient if actor.id == patient_id => Ok(()),
        _ => Err(ConsentError::forbidden(
            "patients may only act on their own records",
        )),
    }
}

/// Patients grant on their own behalf; providers request only for themselves.
fn ensure_may_grant(
    actor: &Actor,
    patient_id: &str,
    provider_id: &str,
    provider_type: ProviderType,
) -> ConsentResult<()> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::Patient => ensure_owner(actor, patient_id),
        role if actor.id == provider_id && Role::from(provider_type) == role => Ok(()),
        _ => Err(ConsentError::forbidden(
            "providers may only request consent for themselves",
        )),
    }
}
