//! Configuration for the OTP verification engine.

use serde::{Deserialize, Serialize};

/// Attempt-limiting and escalation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Hard ceiling on failed attempts per code. At the ceiling the
    /// record is deleted and a new code must be requested.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// A cooldown starts after every this-many consecutive failures.
    #[serde(default = "default_cooldown_after")]
    pub cooldown_after_failures: u32,

    /// Cooldown durations in seconds, indexed by how many cooldowns the
    /// record has already earned. Must be non-decreasing; the last entry
    /// repeats for further escalations.
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: Vec<u64>,

    /// Consecutive-failure streak that flips the sticky breach flag and
    /// triggers the out-of-band alert.
    #[serde(default = "default_breach_threshold")]
    pub breach_threshold: u32,
}

/// Primary cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of active code records held in process.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempt-limiting and escalation policy.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Primary cache sizing.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            cooldown_after_failures: default_cooldown_after(),
            backoff_seconds: default_backoff_seconds(),
            breach_threshold: default_breach_threshold(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            security: SecurityConfig::default(),
            cache: CacheConfig::default(),
            log_level: default_log_level(),
        }
    }
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_cooldown_after() -> u32 {
    2
}

fn default_backoff_seconds() -> Vec<u64> {
    vec![30, 120, 300]
}

const fn default_breach_threshold() -> u32 {
    5
}

const fn default_cache_capacity() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
