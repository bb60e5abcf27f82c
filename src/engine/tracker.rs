//! Security tracker - pure decision functions over a code record.
//!
//! No I/O and no shared state: callers pass the record and the clock in,
//! and get an updated copy out. Every counter mutation in the engine goes
//! through these functions so the cache and the mirror can never diverge
//! on counter *logic*, only on counter *values* (which reconciliation
//! resolves).

use crate::config::SecurityConfig;
use crate::record::CodeRecord;
use chrono::{DateTime, Duration, Utc};

/// Outcome of asking whether an attempt may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No live cooldown; the attempt may be evaluated.
    Allowed,
    /// A cooldown window is live; reject without consuming budget.
    CoolingDown {
        /// Time left until attempts are admitted again.
        remaining: Duration,
    },
}

/// Result of recording a failed comparison.
#[derive(Debug, Clone)]
pub struct FailureOutcome {
    /// The updated record. The input record is never mutated.
    pub record: CodeRecord,
    /// True when this failure flipped the sticky breach flag. Flips at
    /// most once per record; re-detection never re-raises.
    pub breach_raised: bool,
    /// Cooldown window started by this failure, if any.
    pub cooldown_started: Option<Duration>,
    /// Human-readable reason for the caller to surface.
    pub message: String,
}

/// Check whether an attempt may proceed at `now`. Does not mutate.
#[must_use]
pub fn admit_attempt(record: &CodeRecord, now: DateTime<Utc>) -> Admission {
    match record.cooldown_until {
        Some(until) if now < until => Admission::CoolingDown {
            remaining: until - now,
        },
        _ => Admission::Allowed,
    }
}

/// Record a failed comparison, returning the updated record and what the
/// failure triggered.
#[must_use]
pub fn record_failure(
    record: &CodeRecord,
    security: &SecurityConfig,
    now: DateTime<Utc>,
) -> FailureOutcome {
    let mut updated = record.clone();
    updated.attempts += 1;
    updated.consecutive_failures += 1;
    updated.last_attempt_at = Some(now);

    let cooldown_started = cooldown_due(security, updated.consecutive_failures);
    if let Some(duration) = cooldown_started {
        updated.cooldown_until = Some(now + duration);
    }

    let breach_raised =
        !updated.breach_detected && updated.consecutive_failures >= security.breach_threshold;
    if breach_raised {
        updated.breach_detected = true;
    }

    let remaining = remaining_attempts(&updated, security);
    let message = if breach_raised {
        "Incorrect code. Suspicious activity detected on this payment; a supervisor has been notified.".to_string()
    } else if let Some(duration) = cooldown_started {
        format!(
            "Incorrect code. Too many attempts; try again in {} seconds.",
            duration.num_seconds()
        )
    } else if remaining == 0 {
        "Incorrect code. No attempts remaining; request a new code.".to_string()
    } else {
        format!("Incorrect code. {remaining} attempt(s) remaining.")
    };

    FailureOutcome {
        record: updated,
        breach_raised,
        cooldown_started,
        message,
    }
}

/// Attempts left before the ceiling.
#[must_use]
pub fn remaining_attempts(record: &CodeRecord, security: &SecurityConfig) -> u32 {
    security.max_attempts.saturating_sub(record.attempts)
}

/// Cooldown duration for a failure streak, if the streak earns one.
///
/// A cooldown starts after every `cooldown_after_failures` consecutive
/// failures; the duration escalates through the backoff table and the
/// last entry repeats. Deterministic in `consecutive_failures` and
/// monotonically non-decreasing as long as the table is.
#[must_use]
pub fn cooldown_due(security: &SecurityConfig, consecutive_failures: u32) -> Option<Duration> {
    let every = security.cooldown_after_failures;
    if every == 0 || consecutive_failures == 0 || security.backoff_seconds.is_empty() {
        return None;
    }
    if consecutive_failures % every != 0 {
        return None;
    }
    let escalation = (consecutive_failures / every - 1) as usize;
    let index = escalation.min(security.backoff_seconds.len() - 1);
    let seconds = i64::try_from(security.backoff_seconds[index]).unwrap_or(i64::MAX);
    Some(Duration::seconds(seconds))
}
