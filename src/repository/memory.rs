//! In-process stores, used when no database is configured and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::{AuditStore, ConsentStore, PatientDirectory, StoreError, StoreResult};
use crate::models::{AccessLog, Consent, ConsentKey, ConsentStatus, Patient};

#[derive(Default)]
struct ConsentTables {
    records: HashMap<Uuid, Consent>,
    active: HashMap<ConsentKey, Uuid>,
}

/// Consents held in memory. Both maps sit behind one lock so the
/// single-active index can never disagree with the records.
#[derive(Default)]
pub struct InMemoryConsentStore {
    tables: RwLock<ConsentTables>,
}

impl InMemoryConsentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored record, in no particular order.
    pub fn snapshot(&self) -> Vec<Consent> {
        self.tables.read().records.values().cloned().collect()
    }
}

fn newest_first(consents: &mut [Consent]) {
    consents.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl ConsentStore for InMemoryConsentStore {
    async fn find_active_grant(
        &self,
        patient_id: &str,
        provider_id: &str,
    ) -> StoreResult<Option<Consent>> {
        let tables = self.tables.read();
        let key = ConsentKey::new(patient_id, provider_id);
        Ok(tables
            .active
            .get(&key)
            .and_then(|id| tables.records.get(id))
            .cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Consent>> {
        Ok(self.tables.read().records.get(&id).cloned())
    }

    async fn list_active_for_patient(&self, patient_id: &str) -> StoreResult<Vec<Consent>> {
        let tables = self.tables.read();
        let mut consents: Vec<Consent> = tables
            .active
            .iter()
            .filter(|(key, _)| key.patient_id == patient_id)
            .filter_map(|(_, id)| tables.records.get(id).cloned())
            .collect();
        newest_first(&mut consents);
        Ok(consents)
    }

    async fn list_for_patient(&self, patient_id: &str) -> StoreResult<Vec<Consent>> {
        let mut consents: Vec<Consent> = self
            .tables
            .read()
            .records
            .values()
            .filter(|c| c.patient_id == patient_id)
            .cloned()
            .collect();
        newest_first(&mut consents);
        Ok(consents)
    }

    async fn insert(&self, consent: &Consent) -> StoreResult<()> {
        let mut tables = self.tables.write();
        if tables.records.contains_key(&consent.id) {
            return Err(StoreError::Conflict(format!("consent {} already exists", consent.id)));
        }
        if consent.is_granted() {
            let key = consent.key();
            if tables.active.contains_key(&key) {
                return Err(StoreError::Conflict(format!("active grant exists for {}", key)));
            }
            tables.active.insert(key, consent.id);
        }
        tables.records.insert(consent.id, consent.clone());
        Ok(())
    }

    async fn update(&self, consent: &Consent, expected: ConsentStatus) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        let current = match tables.records.get(&consent.id) {
            Some(current) if current.status == expected => current.clone(),
            _ => return Ok(false),
        };

        let key = current.key();
        if current.is_granted() && !consent.is_granted() {
            tables.active.remove(&key);
        } else if !current.is_granted() && consent.is_granted() {
            if tables.active.contains_key(&key) {
                return Err(StoreError::Conflict(format!("active grant exists for {}", key)));
            }
            tables.active.insert(key, consent.id);
        }
        tables.records.insert(consent.id, consent.clone());
        Ok(true)
    }

    async fn lapsed_grants(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Consent>> {
        let tables = self.tables.read();
        Ok(tables
            .active
            .values()
            .filter_map(|id| tables.records.get(id))
            .filter(|c| c.is_lapsed(now))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Append-only log held in memory.
#[derive(Default)]
pub struct InMemoryAuditStore {
    entries: RwLock<Vec<AccessLog>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<AccessLog> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: &AccessLog) -> StoreResult<()> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    async fn list_for_patient(
        &self,
        patient_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<AccessLog>> {
        let entries = self.entries.read();
        // Reverse insertion order keeps same-instant entries newest first.
        let mut logs: Vec<AccessLog> = entries
            .iter()
            .rev()
            .filter(|log| log.patient_id == patient_id)
            .filter(|log| start.map_or(true, |s| log.created_at >= s))
            .filter(|log| end.map_or(true, |e| log.created_at <= e))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(logs)
    }
}

#[derive(Default)]
pub struct InMemoryPatientDirectory {
    patients: DashMap<String, Patient>,
}

impl InMemoryPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, patient: Patient) {
        self.patients.insert(patient.id.clone(), patient);
    }

    pub fn with_patients(patients: impl IntoIterator<Item = Patient>) -> Self {
        let directory = Self::new();
        for patient in patients {
            directory.insert(patient);
        }
        directory
    }
}

#[async_trait]
impl PatientDirectory for InMemoryPatientDirectory {
    async fn get_patient_by_id(&self, id: &str) -> StoreResult<Option<Patient>> {
        Ok(self.patients.get(id).map(|p| p.value().clone()))
    }
}
