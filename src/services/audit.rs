//! Append-only access audit trail.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{ConsentError, ConsentResult};
use crate::models::{AccessLog, NewAccessLog};
use crate::repository::AuditStore;

pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record one access decision, stamped with the current time.
    ///
    /// A storage failure is returned to the caller: an access that cannot be
    /// audited must not proceed.
    pub async fn log_access(&self, entry: NewAccessLog) -> ConsentResult<AccessLog> {
        let now = self.clock.now();
        self.log_access_at(entry, now).await
    }

    /// As [`log_access`](Self::log_access) with an explicit timestamp, so a
    /// composite operation can share one instant across its records.
    pub(crate) async fn log_access_at(
        &self,
        entry: NewAccessLog,
        now: DateTime<Utc>,
    ) -> ConsentResult<AccessLog> {
        if entry.action.trim().is_empty() {
            return Err(ConsentError::bad_request("access log action must not be empty"));
        }
        if entry.patient_id.is_empty() || entry.accessed_by.is_empty() {
            return Err(ConsentError::bad_request(
                "access log requires patient and accessor ids",
            ));
        }

        let log = entry.stamp(now);
        if let Err(e) = self.store.append(&log).await {
            tracing::error!(
                patient_id = %log.patient_id,
                accessed_by = %log.accessed_by,
                action = %log.action,
                error = %e,
                "Audit write failed"
            );
            return Err(e.into());
        }

        tracing::debug!(
            log_id = %log.id,
            patient_id = %log.patient_id,
            accessed_by = %log.accessed_by,
            role = %log.accessed_by_role,
            emergency = log.is_emergency_access,
            "Access logged"
        );
        Ok(log)
    }

    /// Entries for a patient within the inclusive range, newest first.
    pub async fn get_patient_access_logs(
        &self,
        patient_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> ConsentResult<Vec<AccessLog>> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(ConsentError::bad_request("start date is after end date"));
            }
        }
        Ok(self.store.list_for_patient(patient_id, start, end).await?)
    }

    /// The same query rendered as JSON lines, one entry per line.
    pub async fn export_patient_access_logs(
        &self,
        patient_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> ConsentResult<String> {
        let logs = self.get_patient_access_logs(patient_id, start, end).await?;
        let mut out = String::new();
        for log in &logs {
            let line = serde_json::to_string(log)
                .map_err(|e| ConsentError::bad_request(format!("unserializable log: {}", e)))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}
