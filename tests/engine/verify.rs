//! End-to-end verification scenarios.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::harness::{random_code, TestEngine};
use chrono::{Duration, Utc};
use otp_guard::{EngineConfig, PaymentState, RejectReason, SecurityConfig, VerificationResult};

fn reason(result: &VerificationResult) -> RejectReason {
    result.rejection().expect("expected a rejection").reason
}

#[tokio::test]
async fn three_wrong_attempts_exhaust_then_delete_the_code() {
    let engine = TestEngine::new();
    let t0 = Utc::now();
    engine
        .issue("txn-1", "acct-1", "552410", Duration::seconds(420))
        .await;

    let first = engine.verifier.verify_at("txn-1", "000000", t0).await;
    let rejection = first.rejection().expect("wrong code is rejected");
    assert_eq!(rejection.reason, RejectReason::Mismatch);
    assert_eq!(rejection.remaining_attempts, 2);

    let second = engine
        .verifier
        .verify_at("txn-1", "000000", t0 + Duration::seconds(1))
        .await;
    let rejection = second.rejection().expect("wrong code is rejected");
    assert_eq!(rejection.reason, RejectReason::Mismatch);
    assert_eq!(rejection.remaining_attempts, 1);
    // The second consecutive failure starts the first cooldown window.
    assert_eq!(rejection.cooldown_seconds, Some(30));

    // Past the cooldown, the third wrong attempt hits the ceiling.
    let third = engine
        .verifier
        .verify_at("txn-1", "000000", t0 + Duration::seconds(60))
        .await;
    let rejection = third.rejection().expect("ceiling rejection");
    assert_eq!(rejection.reason, RejectReason::Exhausted);
    assert_eq!(rejection.remaining_attempts, 0);

    // The record is gone from every tier; even the right code finds nothing.
    let fourth = engine
        .verifier
        .verify_at("txn-1", "552410", t0 + Duration::seconds(61))
        .await;
    assert_eq!(reason(&fourth), RejectReason::NotFound);
    assert!(engine.mirror.codes_for("acct-1").is_empty());
    assert!(engine.payments.transitions().is_empty());
}

#[tokio::test]
async fn cooldown_rejects_even_the_correct_code() {
    let engine = TestEngine::new();
    let t0 = Utc::now();
    engine
        .issue("txn-1", "acct-1", "552410", Duration::seconds(420))
        .await;

    engine.verifier.verify_at("txn-1", "111111", t0).await;
    let second = engine
        .verifier
        .verify_at("txn-1", "222222", t0 + Duration::seconds(1))
        .await;
    assert_eq!(reason(&second), RejectReason::Mismatch);

    // Inside the window, correctness does not matter.
    let blocked = engine
        .verifier
        .verify_at("txn-1", "552410", t0 + Duration::seconds(5))
        .await;
    let rejection = blocked.rejection().expect("cooldown rejection");
    assert_eq!(rejection.reason, RejectReason::CoolingDown);
    assert_eq!(rejection.remaining_attempts, 1, "cooldown consumed no budget");
    assert!(rejection.cooldown_seconds.is_some_and(|s| s > 0 && s <= 30));

    // Once the window passes the same code verifies.
    let after = engine
        .verifier
        .verify_at("txn-1", "552410", t0 + Duration::seconds(45))
        .await;
    assert!(after.is_success());
}

#[tokio::test]
async fn expired_code_is_rejected_and_discarded() {
    let engine = TestEngine::new();
    let t0 = Utc::now();
    engine
        .issue("txn-1", "acct-1", "552410", Duration::seconds(420))
        .await;

    let late = engine
        .verifier
        .verify_at("txn-1", "552410", t0 + Duration::seconds(421))
        .await;
    assert_eq!(reason(&late), RejectReason::Expired);

    // Discard reached both tiers.
    assert_eq!(engine.verifier.cache_len(), 0);
    assert!(engine.mirror.codes_for("acct-1").is_empty());
}

#[tokio::test]
async fn code_comparison_ignores_case() {
    let engine = TestEngine::new();
    engine
        .issue("txn-1", "acct-1", "a1b2c3", Duration::seconds(420))
        .await;

    let result = engine.verifier.verify("txn-1", "A1B2C3").await;
    assert!(result.is_success());
}

#[tokio::test]
async fn success_transitions_the_payment_exactly_once_and_clears_both_tiers() {
    let engine = TestEngine::new();
    let code = random_code();
    engine
        .issue("txn-1", "acct-1", &code, Duration::seconds(420))
        .await;

    let result = engine.verifier.verify("txn-1", &code).await;
    assert!(result.is_success());

    let transitions = engine.payments.transitions();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].0, "txn-1");
    assert_eq!(transitions[0].1, PaymentState::Confirmed);

    assert_eq!(engine.verifier.cache_len(), 0);
    assert!(engine.mirror.codes_for("acct-1").is_empty());
    assert_eq!(engine.archive.removed(), vec!["txn-1".to_string()]);

    // Replays find nothing; the transition count stays at one.
    let replay = engine.verifier.verify("txn-1", &code).await;
    assert_eq!(reason(&replay), RejectReason::NotFound);
    assert_eq!(engine.payments.transitions().len(), 1);
}

#[tokio::test]
async fn breach_alert_fires_exactly_once() {
    let config = EngineConfig {
        security: SecurityConfig {
            max_attempts: 10,
            breach_threshold: 5,
            ..SecurityConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = TestEngine::with_config(config);
    let t0 = Utc::now();
    engine
        .issue("txn-1", "acct-1", "552410", Duration::seconds(3_600))
        .await;

    // Walk through the escalating cooldowns: failures at 2 and 4 open
    // 30s and 120s windows, the fifth failure crosses the breach line.
    let mut at = t0;
    let mut breach_flags = 0;
    for step in 0..5 {
        let result = engine.verifier.verify_at("txn-1", "999999", at).await;
        let rejection = result.rejection().expect("wrong code is rejected");
        assert_eq!(rejection.reason, RejectReason::Mismatch, "step {step}");
        if rejection.breach_detected {
            breach_flags += 1;
        }
        at = at + Duration::seconds(200);
    }
    assert_eq!(breach_flags, 1, "the flag is reported from the fifth failure on");

    // Alert dispatch is fire-and-forget; give the task a beat to land.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(engine.alerter.alert_count(), 1);

    // A sixth failure keeps the sticky flag but never re-alerts.
    let sixth = engine.verifier.verify_at("txn-1", "999999", at).await;
    assert!(sixth.rejection().expect("rejected").breach_detected);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(engine.alerter.alert_count(), 1);
}

#[tokio::test]
async fn resend_resets_the_budget_but_keeps_the_sticky_state() {
    let config = EngineConfig {
        security: SecurityConfig {
            max_attempts: 10,
            breach_threshold: 2,
            ..SecurityConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = TestEngine::with_config(config);
    let t0 = Utc::now();
    engine
        .issue("txn-1", "acct-1", "552410", Duration::seconds(420))
        .await;

    engine.verifier.verify_at("txn-1", "111111", t0).await;
    let second = engine
        .verifier
        .verify_at("txn-1", "222222", t0 + Duration::seconds(1))
        .await;
    let rejection = second.rejection().expect("rejected");
    assert!(rejection.breach_detected, "threshold of 2 crossed");
    assert_eq!(rejection.cooldown_seconds, Some(30), "cooldown live at resend time");

    // Resend a fresh code while the cooldown is still running.
    engine
        .verifier
        .issue("txn-1", "acct-1", "991188", Utc::now() + Duration::seconds(420))
        .await
        .expect("resend should succeed");

    // The live cooldown survived the resend.
    let blocked = engine
        .verifier
        .verify_at("txn-1", "991188", t0 + Duration::seconds(5))
        .await;
    assert_eq!(reason(&blocked), RejectReason::CoolingDown);

    // Past the window: fresh budget, sticky breach flag, new code only.
    let wrong = engine
        .verifier
        .verify_at("txn-1", "552410", t0 + Duration::seconds(60))
        .await;
    let rejection = wrong.rejection().expect("old code no longer matches");
    assert_eq!(rejection.reason, RejectReason::Mismatch);
    assert_eq!(rejection.remaining_attempts, 9, "attempt budget was reset");
    assert!(rejection.breach_detected, "breach flag is sticky across resends");

    let ok = engine
        .verifier
        .verify_at("txn-1", "991188", t0 + Duration::seconds(61))
        .await;
    assert!(ok.is_success());
}

#[tokio::test]
async fn payment_transition_failure_does_not_flip_the_outcome() {
    let engine = TestEngine::new();
    engine
        .issue("txn-1", "acct-1", "552410", Duration::seconds(420))
        .await;
    engine.payments.fail_transitions(true);

    // The code was right; downstream unavailability stays downstream.
    let result = engine.verifier.verify("txn-1", "552410").await;
    assert!(result.is_success());
    assert!(engine.mirror.codes_for("acct-1").is_empty(), "cleanup still ran");
}

#[tokio::test]
async fn concurrent_attempts_never_lose_counter_updates() {
    let engine = TestEngine::new();
    let config = EngineConfig {
        security: SecurityConfig {
            max_attempts: 100,
            cooldown_after_failures: 0,
            ..SecurityConfig::default()
        },
        ..EngineConfig::default()
    };
    let verifier = std::sync::Arc::new(engine.restarted(config));
    engine.payments.register("txn-1", "acct-1");
    verifier
        .issue("txn-1", "acct-1", "552410", Utc::now() + Duration::seconds(420))
        .await
        .expect("issue should succeed");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let verifier = std::sync::Arc::clone(&verifier);
        handles.push(tokio::spawn(async move {
            verifier.verify("txn-1", "000000").await
        }));
    }
    for handle in handles {
        handle.await.expect("task should not panic");
    }

    // Eight serialized failures: remaining budget reflects all of them.
    let ninth = verifier.verify("txn-1", "000000").await;
    let rejection = ninth.rejection().expect("rejected");
    assert_eq!(rejection.remaining_attempts, 100 - 9);
}
