//! Source connectors
//!
//! Every evidence source implements [`Connector`]. The aggregator only
//! holds a [`ConnectorRegistry`] of trait objects and never knows which
//! concrete sources are behind it.
//!
//! Concrete adapters:
//! - [`LocalDbConnector`]: residence table loaded from a TOML file
//! - [`HttpConnector`]: JSON lookup over HTTP (SIGGES and similar)

pub mod http;
pub mod local_db;

pub use http::HttpConnector;
pub use local_db::LocalDbConnector;

use crate::deadline::Deadline;
use crate::error::ConnectorError;
use async_trait::async_trait;
use rimp_common::config::SourceConfig;
use rimp_common::{Identity, Source, SourceEvidence};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Capability every evidence source provides
///
/// Implementations must return by `deadline.at()` and should return
/// promptly once `deadline.cancelled()` resolves. Evidence is returned
/// raw; the aggregator canonicalizes it against the catalog.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Source this connector reports as
    fn source(&self) -> Source;

    async fn query(
        &self,
        identity: &Identity,
        deadline: &Deadline,
    ) -> Result<SourceEvidence, ConnectorError>;
}

/// Connectors registered at startup, at most one per source
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: Vec<Arc<dyn Connector>>,
    budgets: BTreeMap<Source, Duration>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connector
    ///
    /// # Errors
    /// `Error::Config` if a connector for the same source is already
    /// registered.
    pub fn register(&mut self, connector: Arc<dyn Connector>) -> rimp_common::Result<()> {
        self.register_with_budget(connector, None)
    }

    /// Add a connector whose calls get at most `budget`
    ///
    /// The budget only tightens the per-call deadline; the request cutoff
    /// and connector ceiling still apply.
    pub fn register_with_budget(
        &mut self,
        connector: Arc<dyn Connector>,
        budget: Option<Duration>,
    ) -> rimp_common::Result<()> {
        let source = connector.source();
        if budget == Some(Duration::ZERO) {
            return Err(rimp_common::Error::Config(format!(
                "Source {} has a zero budget",
                source
            )));
        }
        if self.connectors.iter().any(|c| c.source() == source) {
            return Err(rimp_common::Error::Config(format!(
                "Source {} registered twice",
                source
            )));
        }
        if let Some(budget) = budget {
            self.budgets.insert(source, budget);
        }
        self.connectors.push(connector);
        Ok(())
    }

    /// Build connectors from `[[source]]` config tables
    pub fn from_config(sources: &[SourceConfig]) -> rimp_common::Result<Self> {
        let mut registry = Self::new();
        for entry in sources {
            let connector: Arc<dyn Connector> = match entry {
                SourceConfig::LocalDb { source, path, .. } => {
                    Arc::new(LocalDbConnector::load(*source, path)?)
                }
                SourceConfig::Http {
                    source,
                    base_url,
                    token,
                    ..
                } => Arc::new(HttpConnector::new(*source, base_url, token.clone())?),
            };
            let budget = entry.budget_ms().map(Duration::from_millis);
            registry.register_with_budget(connector, budget)?;
            info!(source = %entry.source(), budget_ms = ?entry.budget_ms(), "Connector registered");
        }
        Ok(registry)
    }

    /// Registered sources, in registration order
    pub fn sources(&self) -> Vec<Source> {
        self.connectors.iter().map(|c| c.source()).collect()
    }

    /// Per-call budget configured for `source`, if any
    pub fn budget(&self, source: Source) -> Option<Duration> {
        self.budgets.get(&source).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Connector>> {
        self.connectors.iter()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}
