//! The code record - one issued OTP and its security counters.

use crate::config::SecurityConfig;
use crate::store::MirrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One issued OTP for a payment transaction, together with the security
/// counters accumulated against it.
///
/// Pure data; all counter logic lives in [`crate::engine::tracker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRecord {
    /// Transaction the code was issued for. Unique key, immutable.
    pub transaction_id: String,

    /// Retailer account that owns the transaction. Used to address the
    /// durable mirror.
    pub account_id: String,

    /// The secret code. Compared case-insensitively; immutable for the
    /// life of one issuance.
    pub code: String,

    /// Instant after which the code never matches, even if attempts
    /// remain.
    pub expires_at: DateTime<Utc>,

    /// When this code instance was issued. The newer issuance wins the
    /// identity fields when two tiers disagree.
    pub created_at: DateTime<Utc>,

    /// Failed comparisons against this code instance.
    pub attempts: u32,

    /// Timestamp of the most recent failed attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// While set and in the future, every attempt is rejected without
    /// consuming attempt budget.
    pub cooldown_until: Option<DateTime<Utc>>,

    /// Failure streak driving cooldown escalation and breach detection.
    /// Distinct from `attempts`.
    pub consecutive_failures: u32,

    /// Sticky once set for the life of the record.
    pub breach_detected: bool,
}

/// Observable state of a code record at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeState {
    /// Live and accepting attempts.
    Active,
    /// Transient lockout; re-enters `Active` once the cooldown passes.
    CoolingDown,
    /// Past expiry; treated as absent by all read paths.
    Expired,
    /// Attempt ceiling reached; terminal for this code instance.
    Exhausted,
}

impl CodeRecord {
    /// Create a fresh record for a newly issued code, counters at zero.
    #[must_use]
    pub fn new(
        transaction_id: impl Into<String>,
        account_id: impl Into<String>,
        code: impl Into<String>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            account_id: account_id.into(),
            code: code.into(),
            expires_at,
            created_at: now,
            attempts: 0,
            last_attempt_at: None,
            cooldown_until: None,
            consecutive_failures: 0,
            breach_detected: false,
        }
    }

    /// Case-insensitive comparison against a supplied code.
    #[must_use]
    pub fn matches(&self, supplied: &str) -> bool {
        self.code.eq_ignore_ascii_case(supplied.trim())
    }

    /// Whether the record is past its expiry instant.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether a cooldown window is live at `now`.
    #[must_use]
    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// Derive the record's state at `now` under the given policy.
    ///
    /// Ordering matches the verification flow: expiry dominates the
    /// attempt ceiling, which dominates cooldown.
    #[must_use]
    pub fn state_at(&self, security: &SecurityConfig, now: DateTime<Utc>) -> CodeState {
        if self.is_expired(now) {
            CodeState::Expired
        } else if self.attempts >= security.max_attempts {
            CodeState::Exhausted
        } else if self.is_cooling_down(now) {
            CodeState::CoolingDown
        } else {
            CodeState::Active
        }
    }

    /// Build a record from a mirrored code owned by `account_id`.
    #[must_use]
    pub fn from_mirror(account_id: &str, mirrored: MirrorCode) -> Self {
        Self {
            transaction_id: mirrored.transaction_id,
            account_id: account_id.to_string(),
            code: mirrored.code,
            expires_at: mirrored.expires_at,
            created_at: mirrored.created_at,
            attempts: mirrored.attempts,
            last_attempt_at: mirrored.last_attempt_at,
            cooldown_until: mirrored.cooldown_until,
            consecutive_failures: mirrored.consecutive_failures,
            breach_detected: mirrored.breach_detected,
        }
    }

    /// Project the record into its mirror representation.
    #[must_use]
    pub fn to_mirror(&self) -> MirrorCode {
        MirrorCode {
            transaction_id: self.transaction_id.clone(),
            code: self.code.clone(),
            expires_at: self.expires_at,
            created_at: self.created_at,
            is_used: false,
            attempts: self.attempts,
            last_attempt_at: self.last_attempt_at,
            cooldown_until: self.cooldown_until,
            consecutive_failures: self.consecutive_failures,
            breach_detected: self.breach_detected,
        }
    }
}
