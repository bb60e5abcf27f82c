//! OTP confirmation security engine for field payment collection.
//!
//! A field collector registers a cash/digital payment against a retailer
//! account; the retailer confirms it by supplying a one-time code
//! delivered out-of-band. This crate implements the verification side of
//! that exchange: it stores the short-lived secret against the
//! transaction, defends it against guessing and replay, reconciles the
//! secret across two storage tiers that can fall out of sync, and
//! transitions the payment to completed exactly once.
//!
//! # Architecture
//!
//! - [`record::CodeRecord`] - one issued code and its security counters.
//! - [`engine::CodeCache`] - process-local LRU cache of active records;
//!   authoritative for the counters.
//! - [`store::CodeMirror`] - the durable, account-embedded mirror of
//!   active codes; authoritative for whether a code exists at all.
//! - [`engine::tracker`] - pure attempt admission, cooldown, and breach
//!   decisions.
//! - [`engine::OtpVerifier`] - the coordinator: resolution with
//!   counter-max reconciliation, gating, comparison, payment transition.
//! - [`engine::CleanupReconciler`] - idempotent removal from every tier.
//!
//! # Example
//!
//! ```rust,ignore
//! use otp_guard::{EngineConfig, OtpVerifier};
//! use std::sync::Arc;
//!
//! # async fn run(payments: Arc<dyn otp_guard::PaymentStore>,
//! #              mirror: Arc<dyn otp_guard::CodeMirror>,
//! #              alerter: Arc<dyn otp_guard::BreachAlerter>) {
//! let verifier = OtpVerifier::new(EngineConfig::default(), payments, mirror, alerter);
//!
//! let expires = chrono::Utc::now() + chrono::Duration::seconds(420);
//! verifier.issue("txn-17", "acct-9", "552410", expires).await.ok();
//!
//! match verifier.verify("txn-17", "552410").await {
//!     otp_guard::VerificationResult::Success => println!("payment confirmed"),
//!     otp_guard::VerificationResult::Rejected(r) => println!("{}", r.message),
//! }
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod record;
pub mod store;

pub use config::{CacheConfig, EngineConfig, SecurityConfig};
pub use engine::{
    CacheStats, CleanupReconciler, CleanupReport, CodeCache, OtpVerifier, RejectReason, Rejection,
    VerificationResult,
};
pub use error::{Error, Result};
pub use record::{CodeRecord, CodeState};
pub use store::{
    BreachAlerter, BreachContext, CodeArchive, CodeMirror, MirrorCode, PaymentRef, PaymentState,
    PaymentStore, TransitionMeta,
};
