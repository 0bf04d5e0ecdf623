//! Bootstrap configuration (TOML)
//!
//! Resolution order for the config file itself:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. User config: `~/.config/rimp/<module>.toml`
//! 4. System config: `/etc/rimp/<module>.toml`
//!
//! A missing file is not fatal: the service logs a warning and starts with
//! compiled defaults. A file that exists but does not parse is an error.
//! Individual values may still be overridden on the command line.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::Source;

/// Full contents of a service TOML file; every section is optional
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Listen address, e.g. `"127.0.0.1:5780"`
    pub bind: Option<String>,
    pub logging: LoggingConfig,
    pub budget: BudgetConfig,
    pub idempotency: IdempotencyConfig,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
    pub audit: AuditConfig,
    pub policy: PolicyConfig,
    /// Comuna name catalog (see `catalog` module)
    pub catalog_path: Option<PathBuf>,
    /// Registered evidence sources, `[[source]]` tables
    #[serde(rename = "source")]
    pub sources: Vec<SourceConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive (trace, debug, info, warn, error)
    pub level: String,
    /// Append logs to this file instead of stdout
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Time budget per request
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Whole-request soft budget, keeps p95 under 2s
    pub request_ms: u64,
    /// Hard ceiling for any single connector call
    pub connector_ceiling_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            request_ms: 1800,
            connector_ceiling_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 300,
        }
    }
}

/// Token bucket; `requests_per_second = 0` disables limiting
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 50,
            burst: 100,
        }
    }
}

/// Accepted bearer tokens; an empty list disables authentication
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Include raw names in audit records (debugging only)
    pub include_names: bool,
    /// Salt for the RUN hash written to audit records
    pub run_salt: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            include_names: false,
            run_salt: "rimp".to_string(),
        }
    }
}

/// Overrides for the confidence policy; unset values keep built-in defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub version: Option<String>,
    pub floor: Option<f64>,
    pub ceiling: Option<f64>,
    /// Tie-break order, highest priority first
    pub priority: Option<Vec<Source>>,
    /// Per-source reliability weight, keyed by source name
    pub weights: BTreeMap<String, f64>,
}

/// One registered evidence source
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// File-backed residence table
    LocalDb {
        #[serde(default = "default_local_source")]
        source: Source,
        path: PathBuf,
        /// Per-call budget, tighter than the connector ceiling
        #[serde(default)]
        budget_ms: Option<u64>,
    },
    /// JSON-over-HTTP residence lookup
    Http {
        source: Source,
        base_url: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        budget_ms: Option<u64>,
    },
}

impl SourceConfig {
    pub fn source(&self) -> Source {
        match self {
            SourceConfig::LocalDb { source, .. } | SourceConfig::Http { source, .. } => *source,
        }
    }

    pub fn budget_ms(&self) -> Option<u64> {
        match self {
            SourceConfig::LocalDb { budget_ms, .. } | SourceConfig::Http { budget_ms, .. } => {
                *budget_ms
            }
        }
    }
}

fn default_local_source() -> Source {
    Source::LocalDb
}

/// Locate the TOML file for `module_name`
///
/// Returns `None` when no explicit path was given and no default file
/// exists.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    module_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3 and 4: user then system config
    let file_name = format!("{}.toml", module_name);
    let user_config = dirs::config_dir().map(|d| d.join("rimp").join(&file_name));
    let system_config = PathBuf::from("/etc/rimp").join(&file_name);

    user_config
        .into_iter()
        .chain(std::iter::once(system_config))
        .find(|p| p.exists())
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    Ok(config)
}

/// Load the config file if there is one, otherwise compiled defaults
pub fn load_or_default(path: Option<&Path>) -> Result<TomlConfig> {
    match path {
        Some(path) if path.exists() => {
            let config = load_toml_config(path)?;
            info!("Configuration loaded from {}", path.display());
            Ok(config)
        }
        Some(path) => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        None => {
            info!("No config file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config.budget.request_ms, 1800);
        assert_eq!(config.budget.connector_ceiling_ms, 5000);
        assert_eq!(config.idempotency.ttl_secs, 86_400);
        assert_eq!(config.logging.level, "info");
        assert!(config.auth.tokens.is_empty());
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [budget]
            request_ms = 900
            "#,
        )
        .unwrap();
        assert_eq!(config.budget.request_ms, 900);
        assert_eq!(config.budget.connector_ceiling_ms, 5000);
    }

    #[test]
    fn test_source_tables() {
        let config: TomlConfig = toml::from_str(
            r#"
            [[source]]
            kind = "local_db"
            path = "/var/lib/rimp/residences.toml"

            [[source]]
            kind = "http"
            source = "SIGGES"
            base_url = "https://sigges.example.cl/api"
            token = "s3cret"
            budget_ms = 400
            "#,
        )
        .unwrap();

        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].source(), Source::LocalDb);
        assert_eq!(config.sources[0].budget_ms(), None);
        assert_eq!(config.sources[1].budget_ms(), Some(400));
        match &config.sources[1] {
            SourceConfig::Http {
                source,
                base_url,
                token,
                ..
            } => {
                assert_eq!(*source, Source::Sigges);
                assert_eq!(base_url, "https://sigges.example.cl/api");
                assert_eq!(token.as_deref(), Some("s3cret"));
            }
            other => panic!("expected http source, got {:?}", other),
        }
    }

    #[test]
    fn test_policy_overrides() {
        let config: TomlConfig = toml::from_str(
            r#"
            [policy]
            floor = 0.5
            priority = ["LOCAL_DB", "SIGGES"]

            [policy.weights]
            SIGGES = 1.0
            LOCAL_DB = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(config.policy.floor, Some(0.5));
        assert_eq!(
            config.policy.priority,
            Some(vec![Source::LocalDb, Source::Sigges])
        );
        assert_eq!(config.policy.weights.get("LOCAL_DB"), Some(&0.8));
    }
}
