//! Dual-tier reconciliation scenarios: cache loss mid-lockout, mirror
//! outages, and counter divergence between tiers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::harness::TestEngine;
use chrono::{Duration, Utc};
use otp_guard::{EngineConfig, RejectReason, VerificationResult};

fn reason(result: &VerificationResult) -> RejectReason {
    result.rejection().expect("expected a rejection").reason
}

#[tokio::test]
async fn restarted_instance_inherits_accumulated_failures() {
    let engine = TestEngine::new();
    let t0 = Utc::now();
    engine
        .issue("txn-1", "acct-1", "552410", Duration::seconds(420))
        .await;

    // Two failures on the first instance; counters were mirrored.
    engine.verifier.verify_at("txn-1", "111111", t0).await;
    engine
        .verifier
        .verify_at("txn-1", "222222", t0 + Duration::seconds(1))
        .await;

    // The process restarts: fresh cache, same durable stores. The third
    // wrong attempt must hit the ceiling, not restart the budget.
    let restarted = engine.restarted(EngineConfig::default());
    assert_eq!(restarted.cache_len(), 0);
    let third = restarted
        .verify_at("txn-1", "000000", t0 + Duration::seconds(60))
        .await;
    assert_eq!(reason(&third), RejectReason::Exhausted);

    // The discard was durable: the correct code now resolves nothing.
    let replay = restarted
        .verify_at("txn-1", "552410", t0 + Duration::seconds(61))
        .await;
    assert_eq!(reason(&replay), RejectReason::NotFound);
    assert!(engine.mirror.codes_for("acct-1").is_empty());
}

#[tokio::test]
async fn cooldown_survives_a_cache_miss() {
    let engine = TestEngine::new();
    let t0 = Utc::now();
    engine
        .issue("txn-1", "acct-1", "552410", Duration::seconds(420))
        .await;

    // Second consecutive failure opens a 30s window.
    engine.verifier.verify_at("txn-1", "111111", t0).await;
    engine
        .verifier
        .verify_at("txn-1", "222222", t0 + Duration::seconds(1))
        .await;

    // An attacker forcing a cache miss must still be inside the lockout.
    let restarted = engine.restarted(EngineConfig::default());
    let blocked = restarted
        .verify_at("txn-1", "552410", t0 + Duration::seconds(5))
        .await;
    assert_eq!(reason(&blocked), RejectReason::CoolingDown);
}

#[tokio::test]
async fn local_counters_win_over_a_mirror_that_lost_updates() {
    let engine = TestEngine::new();
    let t0 = Utc::now();
    engine
        .issue("txn-1", "acct-1", "552410", Duration::seconds(420))
        .await;

    engine.verifier.verify_at("txn-1", "111111", t0).await;
    engine
        .verifier
        .verify_at("txn-1", "222222", t0 + Duration::seconds(1))
        .await;

    // The mirror loses the counter updates; the cache stays
    // authoritative for accumulated failures.
    engine.mirror.reset_counters("acct-1", "txn-1");
    let third = engine
        .verifier
        .verify_at("txn-1", "000000", t0 + Duration::seconds(60))
        .await;
    assert_eq!(reason(&third), RejectReason::Exhausted);
}

#[tokio::test]
async fn mirror_outage_degrades_to_not_found_without_destroying_state() {
    let engine = TestEngine::new();
    let t0 = Utc::now();
    engine
        .issue("txn-1", "acct-1", "552410", Duration::seconds(420))
        .await;

    // Fresh instance, dead mirror: resolution fails, is retried once,
    // then degrades to a non-destructive not-found.
    let restarted = engine.restarted(EngineConfig::default());
    engine.mirror.fail_next(2);
    let during_outage = restarted
        .verify_at("txn-1", "552410", t0 + Duration::seconds(1))
        .await;
    assert_eq!(reason(&during_outage), RejectReason::NotFound);

    // Nothing was deleted; once the mirror recovers the code verifies.
    let recovered = restarted
        .verify_at("txn-1", "552410", t0 + Duration::seconds(2))
        .await;
    assert!(recovered.is_success());
}

#[tokio::test]
async fn single_mirror_fault_is_absorbed_by_the_retry() {
    let engine = TestEngine::new();
    let t0 = Utc::now();
    engine
        .issue("txn-1", "acct-1", "552410", Duration::seconds(420))
        .await;

    let restarted = engine.restarted(EngineConfig::default());
    engine.mirror.fail_next(1);
    let result = restarted
        .verify_at("txn-1", "552410", t0 + Duration::seconds(1))
        .await;
    assert!(result.is_success(), "one fault is hidden by the retry");
}

#[tokio::test]
async fn payment_store_outage_also_degrades_to_not_found() {
    let engine = TestEngine::new();
    let t0 = Utc::now();
    engine
        .issue("txn-1", "acct-1", "552410", Duration::seconds(420))
        .await;

    let restarted = engine.restarted(EngineConfig::default());
    engine.payments.fail_next_lookups(2);
    let during_outage = restarted
        .verify_at("txn-1", "552410", t0 + Duration::seconds(1))
        .await;
    assert_eq!(reason(&during_outage), RejectReason::NotFound);

    let recovered = restarted
        .verify_at("txn-1", "552410", t0 + Duration::seconds(2))
        .await;
    assert!(recovered.is_success());
}
