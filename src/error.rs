//! Error types for otp-guard.

/// Errors produced by the engine and its collaborator contracts.
///
/// Business outcomes of a verification attempt (wrong code, cooldown,
/// exhausted budget) are **not** errors; they are carried by
/// [`crate::engine::VerificationResult`]. This enum covers infrastructure
/// faults only.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A collaborator (payment store, durable mirror, archive) failed.
    #[error("Upstream store error: {0}")]
    Upstream(String),

    /// I/O error (config file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for otp-guard operations.
pub type Result<T> = std::result::Result<T, Error>;
