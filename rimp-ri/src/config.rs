//! Service configuration
//!
//! Priority, highest first:
//! 1. Command-line flag (each also readable from an `RIMP_*` variable)
//! 2. TOML config file
//! 3. Compiled defaults

use clap::Parser;
use rimp_common::config::{resolve_config_path, SourceConfig, TomlConfig};
use rimp_common::time::millis_to_duration;
use rimp_common::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::audit::AuditOptions;
use crate::resolver::ConfidencePolicy;

pub const MODULE_NAME: &str = "rimp-ri";
pub const CONFIG_ENV_VAR: &str = "RIMP_CONFIG";
pub const DEFAULT_BIND: &str = "127.0.0.1:5780";

/// Command-line arguments for rimp-ri
#[derive(Parser, Debug, Default)]
#[command(name = "rimp-ri")]
#[command(about = "Residence imputation service")]
#[command(version)]
pub struct Args {
    /// Path to TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long, env = "RIMP_BIND")]
    pub bind: Option<String>,

    /// Log level or filter directive
    #[arg(long, env = "RIMP_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Whole-request time budget in milliseconds
    #[arg(long, env = "RIMP_REQUEST_BUDGET_MS")]
    pub request_budget_ms: Option<u64>,

    /// Per-connector hard ceiling in milliseconds
    #[arg(long, env = "RIMP_CONNECTOR_CEILING_MS")]
    pub connector_ceiling_ms: Option<u64>,

    /// Requests per second accepted on /impute (0 disables limiting)
    #[arg(long, env = "RIMP_RATE_LIMIT_RPS")]
    pub rate_limit_rps: Option<u32>,

    /// Comuna name catalog (TOML)
    #[arg(long, env = "RIMP_CATALOG")]
    pub catalog: Option<PathBuf>,
}

impl Args {
    /// TOML file to read, if any
    pub fn config_path(&self) -> Option<PathBuf> {
        resolve_config_path(self.config.as_deref(), CONFIG_ENV_VAR, MODULE_NAME)
    }
}

/// Fully resolved settings the service runs with
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub request_budget: Duration,
    pub connector_ceiling: Duration,
    pub idempotency_ttl: Duration,
    pub sweep_interval: Duration,
    pub requests_per_second: u32,
    pub burst: u32,
    pub auth_tokens: Vec<String>,
    pub audit: AuditOptions,
    pub policy: ConfidencePolicy,
    pub catalog_path: Option<PathBuf>,
    pub sources: Vec<SourceConfig>,
}

impl ServiceConfig {
    /// Merge command-line arguments over file contents
    ///
    /// # Errors
    /// `Error::Config` for an unparseable bind address, a zero budget, or an
    /// invalid confidence policy.
    pub fn resolve(args: &Args, file: TomlConfig) -> Result<Self> {
        let bind_str = args
            .bind
            .clone()
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind_str
            .parse()
            .map_err(|e| Error::Config(format!("Invalid bind address {:?}: {}", bind_str, e)))?;

        let request_ms = args.request_budget_ms.unwrap_or(file.budget.request_ms);
        let ceiling_ms = args
            .connector_ceiling_ms
            .unwrap_or(file.budget.connector_ceiling_ms);
        if request_ms == 0 || ceiling_ms == 0 {
            return Err(Error::Config(
                "Request budget and connector ceiling must be positive".to_string(),
            ));
        }

        let sweep_secs = file.idempotency.sweep_interval_secs.max(1);

        Ok(Self {
            bind,
            log_level: args
                .log_level
                .clone()
                .unwrap_or(file.logging.level),
            log_file: file.logging.file,
            request_budget: millis_to_duration(request_ms),
            connector_ceiling: millis_to_duration(ceiling_ms),
            idempotency_ttl: Duration::from_secs(file.idempotency.ttl_secs),
            sweep_interval: Duration::from_secs(sweep_secs),
            requests_per_second: args
                .rate_limit_rps
                .unwrap_or(file.rate_limit.requests_per_second),
            burst: file.rate_limit.burst,
            auth_tokens: file.auth.tokens,
            audit: AuditOptions {
                include_names: file.audit.include_names,
                run_salt: file.audit.run_salt,
            },
            policy: ConfidencePolicy::from_config(&file.policy)?,
            catalog_path: args.catalog.clone().or(file.catalog_path),
            sources: file.sources,
        })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5780)),
            log_level: "info".to_string(),
            log_file: None,
            request_budget: Duration::from_millis(1800),
            connector_ceiling: Duration::from_millis(5000),
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(300),
            requests_per_second: 50,
            burst: 100,
            auth_tokens: Vec::new(),
            audit: AuditOptions::default(),
            policy: ConfidencePolicy::default(),
            catalog_path: None,
            sources: Vec::new(),
        }
    }
}
