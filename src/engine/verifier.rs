//! Verification coordinator combining the primary cache, the durable
//! mirror, and the security tracker.
//!
//! This is the core verification logic of the engine.

use crate::config::EngineConfig;
use crate::engine::cache::{CacheStats, CodeCache};
use crate::engine::cleanup::CleanupReconciler;
use crate::engine::reconcile::merge;
use crate::engine::tracker::{self, Admission};
use crate::record::CodeRecord;
use crate::store::{
    BreachAlerter, BreachContext, CodeArchive, CodeMirror, PaymentState, PaymentStore,
    TransitionMeta,
};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a verification attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// No active code resolvable in any tier.
    NotFound,
    /// A code was found but is past its expiry.
    Expired,
    /// The attempt ceiling was reached; the code was discarded.
    Exhausted,
    /// A cooldown window is live; the attempt was not counted.
    CoolingDown,
    /// The supplied code did not match; attempts remain.
    Mismatch,
}

/// Structured rejection returned to the caller. Carries enough for the
/// UI to decide between retry, resend, and hard stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Why the attempt was rejected.
    pub reason: RejectReason,
    /// Human-readable reason to surface to the retailer.
    pub message: String,
    /// Attempts left before the ceiling.
    pub remaining_attempts: u32,
    /// Seconds until attempts are admitted again, when cooling down.
    pub cooldown_seconds: Option<u64>,
    /// Whether the sticky breach flag is set on the record.
    pub breach_detected: bool,
}

/// Outcome of a verification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum VerificationResult {
    /// The code matched; the payment transition and cleanup were
    /// triggered.
    Success,
    /// The attempt was rejected.
    Rejected(Rejection),
}

impl VerificationResult {
    /// True for [`VerificationResult::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// The rejection payload, if any.
    #[must_use]
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Success => None,
            Self::Rejected(rejection) => Some(rejection),
        }
    }
}

impl Rejection {
    fn not_found() -> Self {
        Self {
            reason: RejectReason::NotFound,
            message: "OTP not found or expired.".to_string(),
            remaining_attempts: 0,
            cooldown_seconds: None,
            breach_detected: false,
        }
    }

    fn expired() -> Self {
        Self {
            reason: RejectReason::Expired,
            message: "This code has expired. Request a new code.".to_string(),
            remaining_attempts: 0,
            cooldown_seconds: None,
            breach_detected: false,
        }
    }

    fn exhausted(breach_detected: bool) -> Self {
        Self {
            reason: RejectReason::Exhausted,
            message: "No attempts remain for this code. Request a new code.".to_string(),
            remaining_attempts: 0,
            cooldown_seconds: None,
            breach_detected,
        }
    }

    fn cooling_down(seconds: u64, remaining_attempts: u32, breach_detected: bool) -> Self {
        Self {
            reason: RejectReason::CoolingDown,
            message: format!("Too many attempts. Try again in {seconds} seconds."),
            remaining_attempts,
            cooldown_seconds: Some(seconds),
            breach_detected,
        }
    }
}

/// Per-transaction async locks.
///
/// Attempts against the same transaction are processed as if serialized;
/// attempts against different transactions never contend.
struct TxLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TxLocks {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn acquire(&self, transaction_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.inner
                .lock()
                .entry(transaction_id.to_string())
                .or_default(),
        )
    }

    fn release(&self, transaction_id: &str) {
        let mut map = self.inner.lock();
        if map
            .get(transaction_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(transaction_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// The verification coordinator.
///
/// Resolves a code record (cache, else mirror with counter-max merge),
/// gates the attempt through the security tracker, compares codes, and
/// drives the payment-state transition plus cleanup on success.
pub struct OtpVerifier {
    config: EngineConfig,
    cache: CodeCache,
    payments: Arc<dyn PaymentStore>,
    mirror: Arc<dyn CodeMirror>,
    alerter: Arc<dyn BreachAlerter>,
    cleaner: CleanupReconciler,
    locks: TxLocks,
}

impl OtpVerifier {
    /// Create a new verifier over the given collaborators.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        payments: Arc<dyn PaymentStore>,
        mirror: Arc<dyn CodeMirror>,
        alerter: Arc<dyn BreachAlerter>,
    ) -> Self {
        let cache = CodeCache::with_capacity(config.cache.capacity);
        let cleaner = CleanupReconciler::new(
            cache.clone(),
            Arc::clone(&payments),
            Arc::clone(&mirror),
            None,
        );

        info!(
            cache_capacity = config.cache.capacity,
            max_attempts = config.security.max_attempts,
            breach_threshold = config.security.breach_threshold,
            "OTP verifier initialized"
        );

        Self {
            config,
            cache,
            payments,
            mirror,
            alerter,
            cleaner,
            locks: TxLocks::new(),
        }
    }

    /// Attach an archival store; cleanup will also clear it.
    #[must_use]
    pub fn with_archive(mut self, archive: Arc<dyn CodeArchive>) -> Self {
        self.cleaner = CleanupReconciler::new(
            self.cache.clone(),
            Arc::clone(&self.payments),
            Arc::clone(&self.mirror),
            Some(archive),
        );
        self
    }

    /// Verify a supplied code against the active code for a transaction.
    pub async fn verify(&self, transaction_id: &str, supplied_code: &str) -> VerificationResult {
        self.verify_at(transaction_id, supplied_code, Utc::now())
            .await
    }

    /// [`OtpVerifier::verify`] with an explicit clock, for callers that
    /// own their notion of time (and for deterministic tests).
    pub async fn verify_at(
        &self,
        transaction_id: &str,
        supplied_code: &str,
        now: DateTime<Utc>,
    ) -> VerificationResult {
        let lock = self.locks.acquire(transaction_id);
        let result = {
            let _guard = lock.lock().await;
            self.verify_locked(transaction_id, supplied_code, now).await
        };
        drop(lock);
        self.locks.release(transaction_id);
        result
    }

    /// Issue a new code for a transaction (first issuance or resend).
    ///
    /// A resend replaces the code and expiry and resets the attempt
    /// budget, but inherits the sticky security state: a live cooldown
    /// and the breach flag survive, so a resend cannot bypass a lockout.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Upstream`] if the durable mirror rejects
    /// the write. The local cache entry is kept either way, so the
    /// issuing instance can still verify while the caller retries.
    pub async fn issue(
        &self,
        transaction_id: &str,
        account_id: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let lock = self.locks.acquire(transaction_id);
        let result = {
            let _guard = lock.lock().await;
            self.issue_locked(transaction_id, account_id, code, expires_at)
                .await
        };
        drop(lock);
        self.locks.release(transaction_id);
        result
    }

    /// Invalidate a transaction's code (cancellation path). Removes it
    /// from every tier; already-absent codes are a no-op.
    pub async fn invalidate(&self, transaction_id: &str) {
        let lock = self.locks.acquire(transaction_id);
        {
            let _guard = lock.lock().await;
            info!(%transaction_id, "invalidating code");
            self.cleaner.cleanup(transaction_id).await;
        }
        drop(lock);
        self.locks.release(transaction_id);
    }

    /// Drop expired entries from the primary cache. Runs lazily on every
    /// verification; exposed for an external periodic purge job.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        self.cache.sweep_expired(now)
    }

    /// Get primary cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Get the number of cached code records.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    async fn verify_locked(
        &self,
        transaction_id: &str,
        supplied_code: &str,
        now: DateTime<Utc>,
    ) -> VerificationResult {
        let swept = self.cache.sweep_expired(now);
        if swept > 0 {
            debug!(swept, "lazy sweep dropped expired codes");
        }

        let Some(record) = self.resolve(transaction_id).await else {
            debug!(%transaction_id, "no active code resolved in any tier");
            return VerificationResult::Rejected(Rejection::not_found());
        };

        if record.is_expired(now) {
            debug!(%transaction_id, "code past expiry, discarding");
            self.cleaner
                .cleanup_with_hint(transaction_id, Some(&record.account_id))
                .await;
            return VerificationResult::Rejected(Rejection::expired());
        }

        if record.attempts >= self.config.security.max_attempts {
            debug!(%transaction_id, attempts = record.attempts, "attempt ceiling already reached, discarding");
            self.cleaner
                .cleanup_with_hint(transaction_id, Some(&record.account_id))
                .await;
            return VerificationResult::Rejected(Rejection::exhausted(record.breach_detected));
        }

        if let Admission::CoolingDown { remaining } = tracker::admit_attempt(&record, now) {
            let seconds = ceil_seconds(remaining);
            debug!(%transaction_id, seconds, "attempt rejected during cooldown");
            return VerificationResult::Rejected(Rejection::cooling_down(
                seconds,
                tracker::remaining_attempts(&record, &self.config.security),
                record.breach_detected,
            ));
        }

        if record.matches(supplied_code) {
            self.finish_success(&record, now).await;
            info!(%transaction_id, "code verified");
            VerificationResult::Success
        } else {
            self.finish_failure(&record, now).await
        }
    }

    /// Resolve the active record: primary cache first, then the durable
    /// mirror with a counter-max merge back into the cache.
    async fn resolve(&self, transaction_id: &str) -> Option<CodeRecord> {
        if let Some(record) = self.cache.get(transaction_id) {
            return Some(record);
        }

        debug!(%transaction_id, "cache miss, consulting durable mirror");
        match self.fetch_mirrored(transaction_id).await {
            Ok(found) => found.map(|rec| self.rehydrate(rec)),
            Err(first) => {
                warn!(%transaction_id, error = %first, "mirror resolution failed, retrying once");
                match self.fetch_mirrored(transaction_id).await {
                    Ok(found) => found.map(|rec| self.rehydrate(rec)),
                    Err(second) => {
                        // Upstream faults degrade to not-found, never to
                        // a destructive terminal outcome.
                        warn!(%transaction_id, error = %second, "mirror resolution failed twice, treating as not found");
                        None
                    }
                }
            }
        }
    }

    /// Derive the owning account from the payment, then find the
    /// transaction's code among the account's mirrored active codes.
    async fn fetch_mirrored(&self, transaction_id: &str) -> Result<Option<CodeRecord>> {
        let Some(payment) = self.payments.lookup_payment(transaction_id).await? else {
            return Ok(None);
        };
        let codes = self.mirror.list_active_codes(&payment.account_id).await?;
        Ok(codes
            .into_iter()
            .filter(|code| !code.is_used)
            .find(|code| code.transaction_id == transaction_id)
            .map(|code| CodeRecord::from_mirror(&payment.account_id, code)))
    }

    /// Merge a mirrored record into the cache, preserving whichever tier
    /// has accumulated more failure state.
    fn rehydrate(&self, incoming: CodeRecord) -> CodeRecord {
        let key = incoming.transaction_id.clone();
        self.cache.upsert_with(&key, |local| match local {
            Some(local) => merge(local, &incoming),
            None => incoming,
        })
    }

    async fn finish_success(&self, record: &CodeRecord, now: DateTime<Utc>) {
        let meta = TransitionMeta {
            verified_at: now,
            attempts_used: record.attempts,
        };
        // The code was correct; side-effect failures are logged and
        // never change the outcome already decided by the comparison.
        if let Err(e) = self
            .payments
            .set_payment_state(&record.transaction_id, PaymentState::Confirmed, &meta)
            .await
        {
            warn!(
                transaction_id = %record.transaction_id,
                error = %e,
                "payment state transition failed after correct code; verification stands"
            );
        }
        self.cleaner
            .cleanup_with_hint(&record.transaction_id, Some(&record.account_id))
            .await;
    }

    async fn finish_failure(&self, record: &CodeRecord, now: DateTime<Utc>) -> VerificationResult {
        let outcome = tracker::record_failure(record, &self.config.security, now);
        let updated = outcome.record;

        if outcome.breach_raised {
            self.dispatch_breach_alert(&updated, now);
        }

        if updated.attempts >= self.config.security.max_attempts {
            warn!(
                transaction_id = %updated.transaction_id,
                attempts = updated.attempts,
                "attempt ceiling reached, discarding code"
            );
            self.cleaner
                .cleanup_with_hint(&updated.transaction_id, Some(&updated.account_id))
                .await;
            return VerificationResult::Rejected(Rejection::exhausted(updated.breach_detected));
        }

        // Counters land in the cache before the first suspension point
        // on this path; a cancelled call never leaves a torn state.
        self.cache.insert(updated.clone());

        if let Err(e) = self
            .mirror
            .append_code(&updated.account_id, &updated.to_mirror())
            .await
        {
            warn!(
                transaction_id = %updated.transaction_id,
                error = %e,
                "failed to persist counters to mirror"
            );
        }

        VerificationResult::Rejected(Rejection {
            reason: RejectReason::Mismatch,
            message: outcome.message,
            remaining_attempts: tracker::remaining_attempts(&updated, &self.config.security),
            cooldown_seconds: outcome.cooldown_started.map(ceil_seconds),
            breach_detected: updated.breach_detected,
        })
    }

    async fn issue_locked(
        &self,
        transaction_id: &str,
        account_id: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let now = Utc::now();

        let prior = match self.cache.get(transaction_id) {
            Some(record) => Some(record),
            None => match self.mirror.list_active_codes(account_id).await {
                Ok(codes) => codes
                    .into_iter()
                    .filter(|code| !code.is_used)
                    .find(|code| code.transaction_id == transaction_id)
                    .map(|code| CodeRecord::from_mirror(account_id, code)),
                Err(e) => {
                    warn!(%transaction_id, error = %e, "mirror consult failed during issue; prior security state unavailable");
                    None
                }
            },
        };

        let mut record = CodeRecord::new(transaction_id, account_id, code, expires_at, now);
        if let Some(prior) = &prior {
            // Resend: fresh attempt budget, sticky security state.
            record.breach_detected = prior.breach_detected;
            record.cooldown_until = prior.cooldown_until.filter(|until| *until > now);
        }

        self.cache.insert(record.clone());
        self.mirror.append_code(account_id, &record.to_mirror()).await?;

        info!(
            %transaction_id,
            %account_id,
            resend = prior.is_some(),
            "code issued"
        );
        Ok(())
    }

    fn dispatch_breach_alert(&self, record: &CodeRecord, now: DateTime<Utc>) {
        warn!(
            transaction_id = %record.transaction_id,
            account_id = %record.account_id,
            streak = record.consecutive_failures,
            "breach detected, dispatching alert"
        );
        let alerter = Arc::clone(&self.alerter);
        let account_id = record.account_id.clone();
        let context = BreachContext {
            transaction_id: record.transaction_id.clone(),
            account_id: record.account_id.clone(),
            consecutive_failures: record.consecutive_failures,
            occurred_at: now,
        };
        // Fire-and-forget: alert delivery must not block or fail the
        // verification response.
        tokio::spawn(async move {
            if let Err(e) = alerter.notify(&account_id, &context).await {
                warn!(%account_id, error = %e, "breach alert dispatch failed");
            }
        });
    }
}

fn ceil_seconds(duration: Duration) -> u64 {
    let millis = duration.num_milliseconds().max(0);
    millis.div_euclid(1000) as u64 + u64::from(millis.rem_euclid(1000) > 0)
}
