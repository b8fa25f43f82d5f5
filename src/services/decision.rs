use std::sync::Arc;

use super::lifecycle::expire_best_effort;
use crate::clock::Clock;
use crate::config::UnscopedPolicy;
use crate::error::ConsentResult;
use crate::models::{ConsentCheck, DataCategory};
use crate::repository::ConsentStore;

/// The gate every sensitive read passes through before disclosing
/// protected fields. Logging the decision is left to the caller.
pub struct AccessDecisionEngine {
    store: Arc<dyn ConsentStore>,
    clock: Arc<dyn Clock>,
    unscoped_policy: UnscopedPolicy,
}

impl AccessDecisionEngine {
    pub fn new(store: Arc<dyn ConsentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            unscoped_policy: UnscopedPolicy::default(),
        }
    }

    pub fn with_unscoped_policy(mut self, policy: UnscopedPolicy) -> Self {
        self.unscoped_policy = policy;
        self
    }

    /// May `provider_id` see `required` (or anything, if `None`) of this
    /// patient's data right now?
    ///
    /// A lapsed grant is flipped to EXPIRED on the way; if that write fails
    /// the answer is still "no".
    pub async fn check_consent(
        &self,
        patient_id: &str,
        provider_id: &str,
        required: Option<DataCategory>,
    ) -> ConsentResult<ConsentCheck> {
        let consent = match self.store.find_active_grant(patient_id, provider_id).await? {
            Some(consent) => consent,
            None => return Ok(ConsentCheck::denied()),
        };

        let now = self.clock.now();
        if consent.is_lapsed(now) {
            expire_best_effort(self.store.as_ref(), &consent, now).await;
            return Ok(ConsentCheck::denied());
        }

        let allowed = match (required, self.unscoped_policy) {
            (None, UnscopedPolicy::RequireAnyFlag) => consent.scope.grants_any(),
            (required, _) => consent.scope.satisfies(required),
        };

        if !allowed {
            tracing::debug!(
                consent_id = %consent.id,
                patient_id = %patient_id,
                provider_id = %provider_id,
                required = ?required,
                "Consent present but scope does not cover request"
            );
        }

        Ok(ConsentCheck {
            has_consent: allowed,
            consent: Some(consent),
        })
    }
}
