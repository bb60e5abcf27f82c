//! OTP verification engine.
//!
//! This module implements the verification strategy:
//! 1. Resolve the code record from the primary cache (fast path)
//! 2. On miss, rehydrate from the durable mirror with a counter-max merge
//! 3. Gate the attempt (expiry, ceiling, cooldown), then compare codes
//!
//! # Architecture
//!
//! ```text
//! verify(txn, code) received
//!        │
//!        ▼
//! ┌─────────────────────┐
//! │ Check primary cache │
//! └─────────┬───────────┘
//!           │
//!    ┌──────┴──────┐
//!    │             │
//!   HIT          MISS
//!    │             │
//!    │             ▼
//!    │      Query durable mirror
//!    │      (via payment lookup)
//!    │             │
//!    │      ┌──────┴──────┐
//!    │      │             │
//!    │   FOUND       NOT FOUND
//!    │      │             │
//!    │      ▼             ▼
//!    │  Merge counters  REJECT
//!    │  (max wins)
//!    │      │
//!    └──────┤
//!           ▼
//!   Gate: expired? exhausted? cooling down?
//!           │
//!           ▼
//!   Compare codes (case-insensitive)
//!      │           │
//!    MATCH      MISMATCH
//!      │           │
//!      ▼           ▼
//!  Confirm      Count failure,
//!  payment,     persist both tiers,
//!  clean up     maybe cooldown/breach
//! ```

mod cache;
mod cleanup;
mod reconcile;
pub mod tracker;
mod verifier;

pub use cache::{CacheStats, CodeCache};
pub use cleanup::{CleanupReconciler, CleanupReport};
pub use reconcile::merge;
pub use verifier::{OtpVerifier, RejectReason, Rejection, VerificationResult};
