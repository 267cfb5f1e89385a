//! Pipeline configuration
//!
//! ```toml
//! [director]
//! max_steps = 8
//!
//! [reviewer]
//! max_steps = 12
//!
//! [cache]
//! enabled = true
//! strategy = "step"
//! hash_memo_capacity = 4096
//!
//! [telemetry]
//! default_filter = "info"
//! json = false
//! ```
//!
//! Every section is optional; unknown keys are rejected.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use sva_cache::InvalidationStrategy;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SvaConfig {
    pub director: AgentConfig,
    pub reviewer: AgentConfig,
    pub cache: CacheConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for SvaConfig {
    fn default() -> Self {
        Self {
            director: AgentConfig::new(8),
            reviewer: AgentConfig::new(12),
            cache: CacheConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Step budget of one agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Generation loop cap is `max(4, max_steps + 1)`
    pub max_steps: u32,
}

impl AgentConfig {
    /// Agent budget of `max_steps`
    #[inline]
    #[must_use]
    pub const fn new(max_steps: u32) -> Self {
        Self { max_steps }
    }
}

/// Evidence cache settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Probe, validate and save the cache around each run
    pub enabled: bool,
    pub strategy: InvalidationStrategy,
    /// Paths memoized per run by the hashing wrapper
    pub hash_memo_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: InvalidationStrategy::Step,
            hash_memo_capacity: 4096,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            json: false,
        }
    }
}

impl SvaConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML
    ///
    /// # Errors
    /// Fails on malformed TOML, unknown keys, bad strategy names or
    /// out-of-range values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// Fails if the file cannot be read or does not parse.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.hash_memo_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "cache.hash_memo_capacity",
                message: "must be at least 1".to_string(),
            });
        }
        if self.telemetry.default_filter.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "telemetry.default_filter",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// With director step budget
    #[inline]
    #[must_use]
    pub fn with_director_max_steps(mut self, max_steps: u32) -> Self {
        self.director.max_steps = max_steps;
        self
    }

    /// With reviewer step budget
    #[inline]
    #[must_use]
    pub fn with_reviewer_max_steps(mut self, max_steps: u32) -> Self {
        self.reviewer.max_steps = max_steps;
        self
    }

    /// With invalidation strategy
    #[inline]
    #[must_use]
    pub fn with_strategy(mut self, strategy: InvalidationStrategy) -> Self {
        self.cache.strategy = strategy;
        self
    }

    /// With the cache switched on or off
    #[inline]
    #[must_use]
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache.enabled = enabled;
        self
    }

    /// With telemetry settings
    #[inline]
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }
}
