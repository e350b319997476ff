//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::{ConfigError, StoreResult};

const DEFAULT_SOFT_EXPIRES_MS: u64 = 30_000;
const DEFAULT_HARD_EXPIRES_MS: u64 = 300_000;

/// How to treat duplicate members produced by a to-many mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Drop duplicates of members that were already present and report a
    /// deprecation; reject duplicates the mutation introduced.
    #[default]
    TolerateExisting,
    /// Reject every duplicate.
    Reject,
    /// Silently dedupe every duplicate.
    DedupeAll,
}

impl DuplicatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::TolerateExisting => "tolerate_existing",
            DuplicatePolicy::Reject => "reject",
            DuplicatePolicy::DedupeAll => "dedupe_all",
        }
    }
}

impl FromStr for DuplicatePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tolerate_existing" => Ok(DuplicatePolicy::TolerateExisting),
            "reject" => Ok(DuplicatePolicy::Reject),
            "dedupe_all" => Ok(DuplicatePolicy::DedupeAll),
            _ => Err(ConfigError::InvalidValue {
                field: "duplicates".to_string(),
                value: s.to_string(),
                reason: "expected tolerate_existing, reject or dedupe_all".to_string(),
            }),
        }
    }
}

/// Settings for the built-in time-based cache policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CachePolicyConfig {
    /// Age after which a document is served but refreshed in the background.
    pub soft_expires_ms: u64,
    /// Age after which a document must be refetched before use.
    pub hard_expires_ms: u64,
    /// Mark documents of a type stale after a create/delete of that type.
    pub invalidate_type_on_mutation: bool,
}

impl Default for CachePolicyConfig {
    fn default() -> Self {
        Self {
            soft_expires_ms: DEFAULT_SOFT_EXPIRES_MS,
            hard_expires_ms: DEFAULT_HARD_EXPIRES_MS,
            invalidate_type_on_mutation: true,
        }
    }
}

impl CachePolicyConfig {
    pub fn soft_expires(&self) -> Duration {
        Duration::from_millis(self.soft_expires_ms)
    }

    pub fn hard_expires(&self) -> Duration {
        Duration::from_millis(self.hard_expires_ms)
    }
}

/// Master configuration for a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub duplicates: DuplicatePolicy,
    /// Emit deprecation reports for tolerated duplicates.
    pub report_deprecations: bool,
    pub cache: CachePolicyConfig,
    /// Coalesce identical concurrent mutations unless a request says otherwise.
    pub dedupe_mutations: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            duplicates: DuplicatePolicy::default(),
            report_deprecations: true,
            cache: CachePolicyConfig::default(),
            dedupe_mutations: false,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn with_report_deprecations(mut self, enabled: bool) -> Self {
        self.report_deprecations = enabled;
        self
    }

    pub fn with_cache(mut self, cache: CachePolicyConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_dedupe_mutations(mut self, enabled: bool) -> Self {
        self.dedupe_mutations = enabled;
        self
    }

    /// Parse from TOML and validate.
    pub fn from_toml_str(source: &str) -> StoreResult<Self> {
        let config: StoreConfig = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> StoreResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Defaults overridden by environment variables.
    ///
    /// # Environment Variables
    /// - `TRELLIS_DUPLICATE_POLICY`: tolerate_existing | reject | dedupe_all
    /// - `TRELLIS_REPORT_DEPRECATIONS`: whether to report tolerated duplicates (default: true)
    /// - `TRELLIS_CACHE_SOFT_EXPIRES_MS`: soft expiration (default: 30000)
    /// - `TRELLIS_CACHE_HARD_EXPIRES_MS`: hard expiration (default: 300000)
    /// - `TRELLIS_DEDUPE_MUTATIONS`: coalesce identical mutations (default: false)
    pub fn from_env() -> StoreResult<Self> {
        let mut config = Self::new();

        if let Ok(policy) = std::env::var("TRELLIS_DUPLICATE_POLICY") {
            config.duplicates = policy.parse()?;
        }
        config.report_deprecations = std::env::var("TRELLIS_REPORT_DEPRECATIONS")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);
        config.cache.soft_expires_ms = std::env::var("TRELLIS_CACHE_SOFT_EXPIRES_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SOFT_EXPIRES_MS);
        config.cache.hard_expires_ms = std::env::var("TRELLIS_CACHE_HARD_EXPIRES_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HARD_EXPIRES_MS);
        config.dedupe_mutations = std::env::var("TRELLIS_DEDUPE_MUTATIONS")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - hard_expires_ms > 0
    /// - soft_expires_ms <= hard_expires_ms
    pub fn validate(&self) -> StoreResult<()> {
        if self.cache.hard_expires_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.hard_expires_ms".to_string(),
                value: "0".to_string(),
                reason: "must be > 0".to_string(),
            }
            .into());
        }
        if self.cache.soft_expires_ms > self.cache.hard_expires_ms {
            return Err(ConfigError::InvalidValue {
                field: "cache.soft_expires_ms".to_string(),
                value: self.cache.soft_expires_ms.to_string(),
                reason: format!(
                    "must not exceed cache.hard_expires_ms ({})",
                    self.cache.hard_expires_ms
                ),
            }
            .into());
        }
        Ok(())
    }
}
