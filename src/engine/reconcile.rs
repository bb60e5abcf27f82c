//! Counter-max reconciliation of code records across storage tiers.
//!
//! The primary cache and the durable mirror can describe the same
//! transaction with different counter values when one tier lost updates.
//! Resolution merges the two with this function instead of trusting
//! either tier outright: identity fields follow the newer issuance,
//! security counters take the per-field maximum, so a forced cache miss
//! can never reset an accumulated lockout.

use crate::record::CodeRecord;

/// Merge two views of the same transaction's code record.
///
/// Identity fields (code, expiry, account, creation instant) come from
/// the record with the newer `created_at` - a resend performed by another
/// instance wins the code. Every security counter takes the maximum of
/// the two sides, the breach flag is sticky across both, and timestamps
/// take the later value.
#[must_use]
pub fn merge(local: &CodeRecord, remote: &CodeRecord) -> CodeRecord {
    let newer = if remote.created_at >= local.created_at {
        remote
    } else {
        local
    };

    CodeRecord {
        transaction_id: newer.transaction_id.clone(),
        account_id: newer.account_id.clone(),
        code: newer.code.clone(),
        expires_at: newer.expires_at,
        created_at: newer.created_at,
        attempts: local.attempts.max(remote.attempts),
        consecutive_failures: local.consecutive_failures.max(remote.consecutive_failures),
        last_attempt_at: local.last_attempt_at.max(remote.last_attempt_at),
        cooldown_until: local.cooldown_until.max(remote.cooldown_until),
        breach_detected: local.breach_detected || remote.breach_detected,
    }
}
