//! # Engine Configuration
//!
//! Database, approval policy, retry and sequence settings.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     DEPOT_DB_PATH=/var/lib/depot/depot.db                              │
//! │     DEPOT_CREDIT_LIMIT_POLICY=block                                    │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/depot/depot.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.depot.depot/depot.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # depot.toml
//! [database]
//! path = "depot.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [vouchers]
//! credit_limit_policy = "warn"   # warn | block
//! suggest_alternatives = true
//!
//! [retry]
//! max_retries = 3
//! initial_backoff_ms = 50
//! max_backoff_ms = 2000
//!
//! [[sequences]]
//! entity_type = "return_vouchers"
//! prefix = "RV-"
//! pad_width = 4
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use depot_core::sequence::{EntityType, SequenceConfig};
use depot_db::DbConfig;

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite file. `:memory:` for a throwaway database.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a statement waits for the write lock before `Busy`.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Pool acquire timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("depot.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Pool settings for depot-db.
    pub fn to_db_config(&self) -> DbConfig {
        if self.path.as_os_str() == ":memory:" {
            return DbConfig::in_memory().busy_timeout(Duration::from_millis(self.busy_timeout_ms));
        }
        DbConfig::new(&self.path)
            .max_connections(self.max_connections)
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }
}

// =============================================================================
// Voucher Settings
// =============================================================================

/// What approval does when a debit would push a customer past the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditLimitPolicy {
    /// Approve and attach a warning.
    #[default]
    Warn,
    /// Reject the approval.
    Block,
}

impl std::fmt::Display for CreditLimitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreditLimitPolicy::Warn => write!(f, "warn"),
            CreditLimitPolicy::Block => write!(f, "block"),
        }
    }
}

impl std::str::FromStr for CreditLimitPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "warn" | "warning" => Ok(CreditLimitPolicy::Warn),
            "block" | "reject" => Ok(CreditLimitPolicy::Block),
            other => Err(EngineError::Config(format!(
                "Unknown credit limit policy: '{}'. Valid options: warn, block",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherConfig {
    #[serde(default)]
    pub credit_limit_policy: CreditLimitPolicy,

    /// Attach other branches holding the goods to each shortage.
    #[serde(default = "default_true")]
    pub suggest_alternatives: bool,
}

fn default_true() -> bool {
    true
}

impl Default for VoucherConfig {
    fn default() -> Self {
        VoucherConfig {
            credit_limit_policy: CreditLimitPolicy::default(),
            suggest_alternatives: true,
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Whole-operation retries on `Busy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Set to 0 to surface `Busy` immediately.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    50
}
fn default_max_backoff() -> u64 {
    2000
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

// =============================================================================
// Sequence Settings
// =============================================================================

/// Overrides for one entity type's numbering. Unset fields keep the defaults
/// of [`SequenceConfig::default_for`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSettings {
    pub entity_type: EntityType,

    /// Year the row applies to. Defaults to the current year.
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub pad_width: Option<i64>,
    #[serde(default)]
    pub min_value: Option<i64>,
    #[serde(default)]
    pub max_value: Option<i64>,
    #[serde(default)]
    pub increment_by: Option<i64>,
    #[serde(default)]
    pub auto_reset: Option<bool>,
}

impl SequenceSettings {
    /// Fresh row for `default_year` (or the configured year) positioned
    /// before its first value.
    pub fn to_sequence_config(&self, default_year: i32) -> SequenceConfig {
        let mut config = SequenceConfig::default_for(self.entity_type, self.year.unwrap_or(default_year));
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(width) = self.pad_width {
            config.pad_width = width;
        }
        if let Some(min) = self.min_value {
            config.min_value = min;
        }
        if let Some(max) = self.max_value {
            config.max_value = max;
        }
        if let Some(step) = self.increment_by {
            config.increment_by = step;
        }
        if let Some(auto_reset) = self.auto_reset {
            config.auto_reset = auto_reset;
        }
        config.last_number = config.min_value - config.increment_by;
        config
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub vouchers: VoucherConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Sequence rows created on startup when missing.
    #[serde(default)]
    pub sequences: Vec<SequenceSettings>,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (depot.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn from_toml(contents: &str) -> EngineResult<Self> {
        toml::from_str(contents).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(EngineError::Config("database.path must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(EngineError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(EngineError::Config(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".into(),
            ));
        }

        let mut seen = Vec::new();
        for settings in &self.sequences {
            let key = (settings.entity_type, settings.year);
            if seen.contains(&key) {
                return Err(EngineError::Config(format!(
                    "sequence {} configured twice",
                    settings.entity_type
                )));
            }
            seen.push(key);

            settings
                .to_sequence_config(0)
                .validate()
                .map_err(|e| EngineError::Config(format!("sequence {}: {}", settings.entity_type, e)))?;
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("DEPOT_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(timeout) = std::env::var("DEPOT_BUSY_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.database.busy_timeout_ms = ms;
            }
        }

        if let Ok(max) = std::env::var("DEPOT_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse::<u32>() {
                self.database.max_connections = n;
            }
        }

        if let Ok(policy) = std::env::var("DEPOT_CREDIT_LIMIT_POLICY") {
            match policy.parse() {
                Ok(parsed) => {
                    debug!(policy = %policy, "Overriding credit limit policy from environment");
                    self.vouchers.credit_limit_policy = parsed;
                }
                Err(_) => warn!(policy = %policy, "Unknown credit limit policy in environment"),
            }
        }

        if let Ok(retries) = std::env::var("DEPOT_MAX_RETRIES") {
            if let Ok(n) = retries.parse::<u32>() {
                self.retry.max_retries = n;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "depot", "depot").map(|dirs| dirs.config_dir().join("depot.toml"))
    }

    /// Sequence rows to create for `year`: every entity type, with file
    /// overrides applied where present.
    pub fn sequence_configs(&self, year: i32) -> Vec<SequenceConfig> {
        let mut configs: Vec<SequenceConfig> = EntityType::ALL
            .iter()
            .filter(|entity| {
                !self
                    .sequences
                    .iter()
                    .any(|s| s.entity_type == **entity && s.year.unwrap_or(year) == year)
            })
            .map(|entity| SequenceConfig::default_for(*entity, year))
            .collect();

        configs.extend(self.sequences.iter().map(|s| s.to_sequence_config(year)));
        configs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!("warn".parse::<CreditLimitPolicy>().unwrap(), CreditLimitPolicy::Warn);
        assert_eq!("BLOCK".parse::<CreditLimitPolicy>().unwrap(), CreditLimitPolicy::Block);
        assert!("maybe".parse::<CreditLimitPolicy>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.vouchers.credit_limit_policy, CreditLimitPolicy::Warn);
        assert!(config.vouchers.suggest_alternatives);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_sections() {
        let config = EngineConfig::from_toml(
            r#"
            [database]
            path = "/tmp/depot.db"
            busy_timeout_ms = 250

            [vouchers]
            credit_limit_policy = "block"

            [[sequences]]
            entity_type = "return_vouchers"
            prefix = "RV-"
            pad_width = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/tmp/depot.db"));
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.vouchers.credit_limit_policy, CreditLimitPolicy::Block);
        assert_eq!(config.retry.max_retries, 3);

        let rows = config.sequence_configs(2025);
        assert_eq!(rows.len(), 4);
        let ret = rows.iter().find(|c| c.entity_type == EntityType::ReturnVouchers).unwrap();
        assert_eq!(ret.prefix, "RV-");
        assert_eq!(ret.format(1), "RV-0001");
        assert_eq!(ret.year, 2025);
        assert_eq!(ret.last_number, 0);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.retry.initial_backoff_ms = 5000;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        let bad = SequenceSettings {
            entity_type: EntityType::Payments,
            year: None,
            prefix: None,
            pad_width: None,
            min_value: Some(10),
            max_value: Some(5),
            increment_by: None,
            auto_reset: None,
        };
        config.sequences.push(bad);
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_db_config_mapping() {
        let mut config = DatabaseConfig::default();
        config.busy_timeout_ms = 250;
        let db = config.to_db_config();
        assert_eq!(db.busy_timeout, Duration::from_millis(250));
        assert_eq!(db.max_connections, 5);

        config.path = PathBuf::from(":memory:");
        assert_eq!(config.to_db_config().max_connections, 1);
    }
}
