//! Shared test helpers for rimp-ri integration tests
//!
//! - [`ScriptedConnector`]: answers after a fixed delay and counts calls
//! - [`TestService`]: router + audit recorder + connector handles

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use rimp_common::{Catalog, Identity, Source, SourceEvidence};
use rimp_ri::aggregator::EvidenceAggregator;
use rimp_ri::audit::{AuditOptions, MemoryAuditRecorder};
use rimp_ri::auth::BearerAuth;
use rimp_ri::cache::IdempotencyCache;
use rimp_ri::connectors::{Connector, ConnectorRegistry};
use rimp_ri::deadline::{Deadline, DeadlineCoordinator};
use rimp_ri::error::ConnectorError;
use rimp_ri::imputer::Imputer;
use rimp_ri::rate_limit::RateLimiter;
use rimp_ri::resolver::{ConfidencePolicy, ConfidenceResolver};
use rimp_ri::AppState;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Connector with a fixed answer and delay
pub struct ScriptedConnector {
    source: Source,
    delay: Duration,
    answer: Result<SourceEvidence, ConnectorError>,
    calls: AtomicUsize,
    /// Keep running past cancellation, like a connector that ignores it
    ignore_cancel: bool,
}

impl ScriptedConnector {
    pub fn answering(source: Source, comuna_code: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            source,
            delay,
            answer: Ok(evidence(source, comuna_code)),
            calls: AtomicUsize::new(0),
            ignore_cancel: false,
        })
    }

    pub fn with_address(
        source: Source,
        comuna_code: &str,
        address: &str,
        delay: Duration,
    ) -> Arc<Self> {
        let mut ev = evidence(source, comuna_code);
        ev.address = Some(address.to_string());
        Arc::new(Self {
            source,
            delay,
            answer: Ok(ev),
            calls: AtomicUsize::new(0),
            ignore_cancel: false,
        })
    }

    pub fn failing(source: Source, error: ConnectorError, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            source,
            delay,
            answer: Err(error),
            calls: AtomicUsize::new(0),
            ignore_cancel: false,
        })
    }

    pub fn stubborn(source: Source, comuna_code: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            source,
            delay,
            answer: Ok(evidence(source, comuna_code)),
            calls: AtomicUsize::new(0),
            ignore_cancel: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn source(&self) -> Source {
        self.source
    }

    async fn query(
        &self,
        _identity: &Identity,
        deadline: &Deadline,
    ) -> Result<SourceEvidence, ConnectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.ignore_cancel {
            tokio::time::sleep(self.delay).await;
            return self.answer.clone();
        }
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => self.answer.clone(),
            _ = deadline.cancelled() => Err(ConnectorError::Cancelled),
        }
    }
}

/// Raw evidence as a connector would report it (names filled by catalog)
pub fn evidence(source: Source, comuna_code: &str) -> SourceEvidence {
    let comuna = match comuna_code {
        "02201" => "Calama",
        "02101" => "Antofagasta",
        "13101" => "Santiago",
        _ => "Desconocida",
    };
    SourceEvidence {
        source,
        region: String::new(),
        region_code: String::new(),
        comuna: comuna.to_string(),
        comuna_code: comuna_code.to_string(),
        address: None,
        observed_at: Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap(),
        error: None,
    }
}

pub struct TestService {
    pub app: axum::Router,
    pub state: AppState,
    pub audit: Arc<MemoryAuditRecorder>,
}

pub struct TestServiceBuilder {
    connectors: Vec<(Arc<dyn Connector>, Option<Duration>)>,
    request_budget: Duration,
    connector_ceiling: Duration,
    tokens: Vec<String>,
    rate: (u32, u32),
    ttl: Duration,
}

impl Default for TestServiceBuilder {
    fn default() -> Self {
        Self {
            connectors: Vec::new(),
            request_budget: Duration::from_millis(1800),
            connector_ceiling: Duration::from_secs(5),
            tokens: Vec::new(),
            rate: (0, 0),
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl TestServiceBuilder {
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.push((connector, None));
        self
    }

    /// Register a connector whose calls are capped at `budget`
    pub fn connector_with_budget(
        mut self,
        connector: Arc<dyn Connector>,
        budget: Duration,
    ) -> Self {
        self.connectors.push((connector, Some(budget)));
        self
    }

    pub fn budget(mut self, request_budget: Duration, connector_ceiling: Duration) -> Self {
        self.request_budget = request_budget;
        self.connector_ceiling = connector_ceiling;
        self
    }

    pub fn tokens(mut self, tokens: &[&str]) -> Self {
        self.tokens = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn rate_limit(mut self, requests_per_second: u32, burst: u32) -> Self {
        self.rate = (requests_per_second, burst);
        self
    }

    pub fn build(self) -> TestService {
        let mut registry = ConnectorRegistry::new();
        for (connector, budget) in self.connectors {
            registry
                .register_with_budget(connector, budget)
                .expect("duplicate test connector");
        }

        let audit = Arc::new(MemoryAuditRecorder::new());
        let imputer = Imputer::new(
            EvidenceAggregator::new(
                registry,
                Arc::new(Catalog::builtin()),
                DeadlineCoordinator::new(self.request_budget, self.connector_ceiling),
            ),
            ConfidenceResolver::new(ConfidencePolicy::default()),
            Arc::new(IdempotencyCache::new(self.ttl)),
            audit.clone(),
            AuditOptions::default(),
        );

        let state = AppState::new(
            imputer,
            BearerAuth::new(self.tokens),
            RateLimiter::new(self.rate.0, self.rate.1),
        );
        TestService {
            app: rimp_ri::build_router(state.clone()),
            state,
            audit,
        }
    }
}

pub fn service() -> TestServiceBuilder {
    TestServiceBuilder::default()
}

/// POST /impute request
pub fn impute_request(
    body: &str,
    idempotency_key: Option<&str>,
    token: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/impute")
        .header("content-type", "application/json");
    if let Some(key) = idempotency_key {
        builder = builder.header("x-idempotency-key", key);
    }
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Collect a response body as bytes
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("JSON body")
}
