//! Access decisions against the live consent state.

mod common;

use chrono::Duration;
use common::*;
use consentguard::config::{Config, UnscopedPolicy};
use consentguard::models::{ConsentScope, ConsentStatus, DataCategory};
use std::sync::atomic::Ordering;

// ===== Scope =====

#[tokio::test]
async fn test_diagnosis_only_consent() {
    let h = harness();
    h.service
        .grant_consent(&patient("P1"), grant("P1", "DOC1", diagnosis_only()))
        .await
        .unwrap();

    let doc = doctor("DOC1");
    let diag = h
        .service
        .check_consent(&doc, "P1", "DOC1", Some(DataCategory::Diagnosis))
        .await
        .unwrap();
    assert!(diag.has_consent);

    let labs = h
        .service
        .check_consent(&doc, "P1", "DOC1", Some(DataCategory::LabResults))
        .await
        .unwrap();
    assert!(!labs.has_consent);
    assert!(
        labs.consent.is_some(),
        "denied-by-scope answers still carry the record"
    );
}

#[tokio::test]
async fn test_each_category_requires_its_flag() {
    let h = harness();
    for granted in DataCategory::ALL {
        let provider = format!("DOC-{}", granted.label());
        h.service
            .grant_consent(&admin(), grant("P1", &provider, ConsentScope::only(granted)))
            .await
            .unwrap();

        for required in DataCategory::ALL {
            let check = h
                .service
                .check_consent(&admin(), "P1", &provider, Some(required))
                .await
                .unwrap();
            assert_eq!(
                check.has_consent,
                granted == required || granted == DataCategory::FullHistory,
                "{} granted, {} required",
                granted,
                required
            );
        }
    }
}

#[tokio::test]
async fn test_full_history_covers_every_category() {
    let h = harness();
    h.service
        .grant_consent(
            &patient("P1"),
            grant("P1", "DOC1", ConsentScope::only(DataCategory::FullHistory)),
        )
        .await
        .unwrap();

    for required in DataCategory::ALL {
        let check = h
            .service
            .check_consent(&doctor("DOC1"), "P1", "DOC1", Some(required))
            .await
            .unwrap();
        assert!(check.has_consent, "{} should be covered", required);
    }
}

#[tokio::test]
async fn test_no_consent_denies_without_record() {
    let h = harness();
    let check = h
        .service
        .check_consent(&doctor("DOC1"), "P1", "DOC1", Some(DataCategory::Diagnosis))
        .await
        .unwrap();
    assert!(!check.has_consent);
    assert!(check.consent.is_none());
}

#[tokio::test]
async fn test_consent_does_not_leak_across_patients() {
    let h = harness();
    h.service
        .grant_consent(&patient("P1"), grant("P1", "DOC1", ConsentScope::full()))
        .await
        .unwrap();

    let check = h
        .service
        .check_consent(&doctor("DOC1"), "P2", "DOC1", None)
        .await
        .unwrap();
    assert!(!check.has_consent);
}

// ===== Lifecycle effects =====

#[tokio::test]
async fn test_revoked_consent_denies() {
    let h = harness();
    let consent = h
        .service
        .grant_consent(&patient("P1"), grant("P1", "DOC1", diagnosis_only()))
        .await
        .unwrap();
    h.service.revoke_consent(&patient("P1"), consent.id).await.unwrap();

    let check = h
        .service
        .check_consent(&doctor("DOC1"), "P1", "DOC1", Some(DataCategory::Diagnosis))
        .await
        .unwrap();
    assert!(!check.has_consent);
}

#[tokio::test]
async fn test_expiry_is_honoured_and_flipped() {
    let h = harness();
    let mut request = grant("P1", "DOC1", diagnosis_only());
    request.expires_at = Some(epoch() + Duration::hours(1));
    let consent = h.service.grant_consent(&patient("P1"), request).await.unwrap();

    h.clock.advance(Duration::minutes(59));
    let before = h
        .service
        .check_consent(&doctor("DOC1"), "P1", "DOC1", Some(DataCategory::Diagnosis))
        .await
        .unwrap();
    assert!(before.has_consent);

    h.clock.advance(Duration::minutes(1));
    let at_boundary = h
        .service
        .check_consent(&doctor("DOC1"), "P1", "DOC1", Some(DataCategory::Diagnosis))
        .await
        .unwrap();
    assert!(!at_boundary.has_consent, "expiresAt itself is already expired");
    assert!(at_boundary.consent.is_none());

    let stored = h.service.lifecycle().get_consent(consent.id).await.unwrap();
    assert_eq!(stored.status, ConsentStatus::Expired);
}

#[tokio::test]
async fn test_lapsed_consent_denied_even_if_flip_fails() {
    let h = harness();
    let mut request = grant("P1", "DOC1", diagnosis_only());
    request.expires_at = Some(epoch() + Duration::hours(1));
    let consent = h.service.grant_consent(&patient("P1"), request).await.unwrap();

    h.clock.advance(Duration::hours(2));
    h.consents.fail_updates.store(true, Ordering::SeqCst);

    let check = h
        .service
        .check_consent(&doctor("DOC1"), "P1", "DOC1", Some(DataCategory::Diagnosis))
        .await
        .unwrap();
    assert!(!check.has_consent);
    assert!(h.consents.updates.load(Ordering::SeqCst) >= 1);

    let stored = h.service.lifecycle().get_consent(consent.id).await.unwrap();
    assert_eq!(stored.status, ConsentStatus::Granted, "flip failed, record untouched");
}

#[tokio::test]
async fn test_expired_consent_stays_denied() {
    let h = harness();
    let mut request = grant("P1", "DOC1", ConsentScope::full());
    request.expires_at = Some(epoch() + Duration::minutes(30));
    h.service.grant_consent(&patient("P1"), request).await.unwrap();

    h.clock.advance(Duration::hours(1));
    for _ in 0..3 {
        let check = h
            .service
            .check_consent(&doctor("DOC1"), "P1", "DOC1", None)
            .await
            .unwrap();
        assert!(!check.has_consent);
    }

    // Rewinding the clock does not revive an expired record.
    h.clock.set(epoch());
    let check = h
        .service
        .check_consent(&doctor("DOC1"), "P1", "DOC1", None)
        .await
        .unwrap();
    assert!(!check.has_consent);
}

// ===== Unscoped checks =====

#[tokio::test]
async fn test_unscoped_check_requires_some_flag_by_default() {
    let h = harness();
    h.service
        .grant_consent(&patient("P1"), grant("P1", "DOC1", ConsentScope::none()))
        .await
        .unwrap();
    h.service
        .grant_consent(&patient("P1"), grant("P1", "DOC2", diagnosis_only()))
        .await
        .unwrap();

    let empty = h
        .service
        .check_consent(&doctor("DOC1"), "P1", "DOC1", None)
        .await
        .unwrap();
    assert!(!empty.has_consent);

    let scoped = h
        .service
        .check_consent(&doctor("DOC2"), "P1", "DOC2", None)
        .await
        .unwrap();
    assert!(scoped.has_consent);
}

#[tokio::test]
async fn test_unscoped_check_with_any_grant_policy() {
    let h = harness_with_config(Config {
        unscoped_policy: UnscopedPolicy::AnyGrant,
        ..Config::default()
    });
    h.service
        .grant_consent(&patient("P1"), grant("P1", "DOC1", ConsentScope::none()))
        .await
        .unwrap();

    let check = h
        .service
        .check_consent(&doctor("DOC1"), "P1", "DOC1", None)
        .await
        .unwrap();
    assert!(check.has_consent);

    let scoped = h
        .service
        .check_consent(&doctor("DOC1"), "P1", "DOC1", Some(DataCategory::Allergies))
        .await
        .unwrap();
    assert!(!scoped.has_consent);
}

#[tokio::test]
async fn test_regrant_narrows_access_immediately() {
    let h = harness();
    h.service
        .grant_consent(&patient("P1"), grant("P1", "DOC1", ConsentScope::full()))
        .await
        .unwrap();
    h.service
        .grant_consent(&patient("P1"), grant("P1", "DOC1", diagnosis_only()))
        .await
        .unwrap();

    let check = h
        .service
        .check_consent(&doctor("DOC1"), "P1", "DOC1", Some(DataCategory::Medications))
        .await
        .unwrap();
    assert!(!check.has_consent);
}
