//! Collaborator contracts consumed by the engine.
//!
//! The engine never owns payment state, the durable mirror, or alert
//! delivery; it talks to them through these narrow traits. Production
//! wires them to the document store and messaging backends; tests use
//! in-memory implementations.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a payment as known to the payment store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    /// Registered by the collector, waiting for the retailer's code.
    PendingConfirmation,
    /// Confirmed by a successful code verification.
    Confirmed,
    /// Cancelled before confirmation.
    Cancelled,
}

/// Payment fields the engine needs: ownership and current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRef {
    /// Retailer account the payment was registered against.
    pub account_id: String,
    /// Amount in minor currency units.
    pub amount_minor: i64,
    /// Current payment state.
    pub state: PaymentState,
}

/// Metadata attached to a payment-state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionMeta {
    /// When the verification that caused the transition completed.
    pub verified_at: DateTime<Utc>,
    /// Failed attempts consumed before the code matched.
    pub attempts_used: u32,
}

/// A code as persisted in the account-embedded mirror.
///
/// Legacy mirror rows carry only the identity fields; the counters are
/// serde-defaulted so such rows read back as zero and the counter-max
/// merge still applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorCode {
    /// Transaction the code was issued for.
    pub transaction_id: String,
    /// The secret code.
    pub code: String,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Issuance instant.
    pub created_at: DateTime<Utc>,
    /// True once the code verified successfully; used rows are treated
    /// as absent by resolution.
    #[serde(default)]
    pub is_used: bool,
    /// Failed comparisons persisted from the verifying instance.
    #[serde(default)]
    pub attempts: u32,
    /// Most recent failed attempt.
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Live lockout window, if any.
    #[serde(default)]
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Failure streak persisted from the verifying instance.
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Sticky breach flag.
    #[serde(default)]
    pub breach_detected: bool,
}

/// Context handed to the breach alert dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreachContext {
    /// Transaction under attack.
    pub transaction_id: String,
    /// Owning retailer account.
    pub account_id: String,
    /// Failure streak at detection time.
    pub consecutive_failures: u32,
    /// When the breach was detected.
    pub occurred_at: DateTime<Utc>,
}

/// Read/transition access to payments.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Look up the payment a transaction id belongs to.
    ///
    /// `Ok(None)` means the transaction is unknown; `Err` means the
    /// store could not be reached and the caller may retry.
    async fn lookup_payment(&self, transaction_id: &str) -> Result<Option<PaymentRef>>;

    /// Transition a payment to a new state.
    async fn set_payment_state(
        &self,
        transaction_id: &str,
        state: PaymentState,
        meta: &TransitionMeta,
    ) -> Result<()>;
}

/// The durable, multi-writer mirror of active codes embedded in the
/// retailer's account record.
///
/// The mirror is the tie-breaking source of truth for *whether* an
/// active code exists; the primary cache is the tie-breaking source for
/// *how many failures* have accumulated.
#[async_trait]
pub trait CodeMirror: Send + Sync {
    /// List the active codes embedded in an account record.
    async fn list_active_codes(&self, account_id: &str) -> Result<Vec<MirrorCode>>;

    /// Insert or replace (by transaction id) a code in the account's
    /// embedded collection.
    async fn append_code(&self, account_id: &str, code: &MirrorCode) -> Result<()>;

    /// Remove a code from the account's embedded collection. Removing an
    /// absent code is a no-op.
    async fn remove_code(&self, account_id: &str, transaction_id: &str) -> Result<()>;
}

/// Out-of-band alert channel for breach escalation. Best-effort.
#[async_trait]
pub trait BreachAlerter: Send + Sync {
    /// Notify a supervising party that a breach was detected.
    async fn notify(&self, account_id: &str, context: &BreachContext) -> Result<()>;
}

/// Optional archival store of issued codes, kept for audit. Cleanup
/// removes entries from it alongside the live tiers.
#[async_trait]
pub trait CodeArchive: Send + Sync {
    /// Remove an archived code. Removing an absent entry is a no-op.
    async fn remove(&self, transaction_id: &str) -> Result<()>;
}
