//! rimp-ri library interface
//!
//! Residence imputation: resolves a person's region, comuna and address
//! from a Chilean RUN by querying several unreliable sources in parallel
//! under a time budget and fusing their answers with a confidence score.
//!
//! Exposed as a library so integration tests can build the router with
//! scripted connectors.

pub mod aggregator;
pub mod api;
pub mod audit;
pub mod auth;
pub mod cache;
pub mod config;
pub mod connectors;
pub mod deadline;
pub mod error;
pub mod imputer;
pub mod rate_limit;
pub mod resolver;

pub use crate::error::{ApiError, ApiResult, ImputeError};

use axum::Router;
use chrono::{DateTime, Utc};
use rimp_common::Catalog;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::aggregator::EvidenceAggregator;
use crate::audit::AuditRecorder;
use crate::auth::BearerAuth;
use crate::cache::IdempotencyCache;
use crate::config::ServiceConfig;
use crate::connectors::ConnectorRegistry;
use crate::deadline::DeadlineCoordinator;
use crate::imputer::Imputer;
use crate::rate_limit::RateLimiter;
use crate::resolver::ConfidenceResolver;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub imputer: Arc<Imputer>,
    pub auth: Arc<BearerAuth>,
    pub rate_limiter: Arc<RateLimiter>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(imputer: Imputer, auth: BearerAuth, rate_limiter: RateLimiter) -> Self {
        Self {
            imputer: Arc::new(imputer),
            auth: Arc::new(auth),
            rate_limiter: Arc::new(rate_limiter),
            startup_time: Utc::now(),
        }
    }

    /// Wire every component from resolved configuration
    pub fn from_config(
        config: &ServiceConfig,
        recorder: Arc<dyn AuditRecorder>,
    ) -> rimp_common::Result<Self> {
        let catalog = match &config.catalog_path {
            Some(path) => Catalog::load(path)?,
            None => Catalog::builtin(),
        };

        let registry = ConnectorRegistry::from_config(&config.sources)?;
        if registry.is_empty() {
            tracing::warn!("No sources configured; every request will be UPSTREAM_UNAVAILABLE");
        }

        let aggregator = EvidenceAggregator::new(
            registry,
            Arc::new(catalog),
            DeadlineCoordinator::new(config.request_budget, config.connector_ceiling),
        );
        let cache = Arc::new(IdempotencyCache::new(config.idempotency_ttl));
        let imputer = Imputer::new(
            aggregator,
            ConfidenceResolver::new(config.policy.clone()),
            cache,
            recorder,
            config.audit.clone(),
        );

        info!(
            sources = ?imputer.sources(),
            policy = imputer.policy_version(),
            request_budget_ms = config.request_budget.as_millis() as u64,
            "Imputer ready"
        );

        Ok(Self::new(
            imputer,
            BearerAuth::new(config.auth_tokens.iter().cloned()),
            RateLimiter::new(config.requests_per_second, config.burst),
        ))
    }

    pub fn cache(&self) -> Arc<IdempotencyCache> {
        Arc::clone(self.imputer.cache())
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::impute_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
