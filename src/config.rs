//! MigrationPilot configuration
//!
//! Loaded from `migrationpilot.toml`:
//!
//! ```toml
//! pg_version = 16
//! fail_on = "critical"
//! production_context = "snapshots/prod.json"
//!
//! [rules]
//! disabled = ["MP023", "MP041"]
//!
//! [rules.severity]
//! MP017 = "critical"
//!
//! [thresholds]
//! large_table_rows = 5000000
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PilotError, PilotResult};
use crate::rules::Severity;

/// File name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "migrationpilot.toml";

/// Oldest and newest PostgreSQL major versions the rules know about.
pub const SUPPORTED_PG_VERSIONS: std::ops::RangeInclusive<u32> = 9..=18;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target PostgreSQL major version
    pub pg_version: u32,

    /// Lowest severity that fails a run
    pub fail_on: FailOn,

    /// Path to a production snapshot (JSON)
    pub production_context: Option<PathBuf>,

    /// Rule selection and severity overrides
    pub rules: RulesConfig,

    /// Limits used by the production-aware rules
    pub thresholds: Thresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pg_version: 17,
            fail_on: FailOn::Critical,
            production_context: None,
            rules: RulesConfig::default(),
            thresholds: Thresholds::default(),
        }
    }
}

/// When the CLI exits non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailOn {
    #[default]
    Critical,
    Warning,
    Never,
}

impl FailOn {
    /// Whether a violation of `severity` fails the run.
    pub fn is_triggered_by(self, severity: Severity) -> bool {
        match self {
            FailOn::Critical => severity == Severity::Critical,
            FailOn::Warning => true,
            FailOn::Never => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Rule IDs that are never run
    pub disabled: Vec<String>,

    /// Per-rule severity overrides
    pub severity: HashMap<String, Severity>,
}

/// Thresholds for production-aware and configurable rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Row count from which a table counts as large (MP014)
    pub large_table_rows: u64,

    /// Total query calls from which a table counts as hot (MP013)
    pub high_traffic_calls: u64,

    /// Active connections from which an exclusive lock is flagged (MP019)
    pub high_connection_count: u32,

    /// Mean query latency that conflicts with a blocking lock (MP072)
    pub slow_query_ms: f64,

    /// Longest acceptable `lock_timeout` (MP057)
    pub max_lock_timeout_ms: u64,

    /// Index count from which a rewrite is flagged (MP073)
    pub many_indexes: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            large_table_rows: 1_000_000,
            high_traffic_calls: 10_000,
            high_connection_count: 20,
            slow_query_ms: 1_000.0,
            max_lock_timeout_ms: 10_000,
            many_indexes: 10,
        }
    }
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> PilotResult<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration: `explicit` if given, else `migrationpilot.toml`
    /// in the working directory, else the user config directory, else
    /// defaults.
    pub fn load(explicit: Option<&Path>) -> PilotResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        for candidate in Self::search_paths() {
            if candidate.is_file() {
                return Self::from_file(&candidate);
            }
        }
        tracing::debug!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("migrationpilot").join("config.toml"));
        }
        paths
    }

    pub fn from_file(path: &Path) -> PilotResult<Self> {
        tracing::info!("loading config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Reject values the analysis cannot work with.
    pub fn validate(&self) -> PilotResult<()> {
        if !SUPPORTED_PG_VERSIONS.contains(&self.pg_version) {
            return Err(PilotError::Config(format!(
                "pg_version must be between {} and {}, got {}",
                SUPPORTED_PG_VERSIONS.start(),
                SUPPORTED_PG_VERSIONS.end(),
                self.pg_version
            )));
        }
        let ids = self.rules.disabled.iter().chain(self.rules.severity.keys());
        for id in ids {
            if !is_rule_id(id) {
                return Err(PilotError::Config(format!("invalid rule id \"{}\"", id)));
            }
        }
        Ok(())
    }
}

/// `MP` followed by three digits.
fn is_rule_id(id: &str) -> bool {
    let bytes = id.as_bytes();
    bytes.len() == 5
        && bytes[..2].eq_ignore_ascii_case(b"MP")
        && bytes[2..].iter().all(u8::is_ascii_digit)
}
