//! Request pipeline for `POST /impute`
//!
//! ```text
//! RECEIVED → NORMALIZING ─┬─ VALIDATION_ERROR
//!                         └─ CACHE_LOOKUP ─┬─ CACHE_HIT
//!                                          └─ AGGREGATING → RESOLVING
//!
//! RESOLVING ─┬─ UPSTREAM_UNAVAILABLE
//!            └─ RESOLVED → CACHE_STORE → SUCCESS
//! ```
//!
//! `RATE_LIMITED` and `AUTH_ERROR` happen before normalization and are
//! reported through [`Imputer::reject`]. Every path ends with exactly one
//! audit event; a request dropped mid-flight records `ABANDONED`.
//!
//! Audit ids: a successful response carries the resolution's `audit_id`,
//! which is the same on every replay of the same idempotent request. A
//! failed response carries the request's own id.

use crate::aggregator::{ConnectorTrace, EvidenceAggregator};
use crate::audit::{AuditEvent, AuditOptions, AuditOutcome, AuditRecorder};
use crate::cache::{CacheKey, CacheStatus, IdempotencyCache};
use crate::error::{ApiError, ApiResult, ImputeError};
use crate::resolver::{ConfidenceResolver, DecisionRule};
use rimp_common::hashing::body_hash;
use rimp_common::time::duration_to_millis;
use rimp_common::{uuid_utils, Identity, Resolution, Source};
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// `POST /impute` body
#[derive(Debug, Clone, Deserialize)]
pub struct ImputeRequest {
    pub rut: String,
    pub dv: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

pub struct Imputer {
    aggregator: Arc<EvidenceAggregator>,
    resolver: Arc<ConfidenceResolver>,
    cache: Arc<IdempotencyCache>,
    recorder: Arc<dyn AuditRecorder>,
    options: AuditOptions,
}

impl Imputer {
    pub fn new(
        aggregator: EvidenceAggregator,
        resolver: ConfidenceResolver,
        cache: Arc<IdempotencyCache>,
        recorder: Arc<dyn AuditRecorder>,
        options: AuditOptions,
    ) -> Self {
        Self {
            aggregator: Arc::new(aggregator),
            resolver: Arc::new(resolver),
            cache,
            recorder,
            options,
        }
    }

    pub fn cache(&self) -> &Arc<IdempotencyCache> {
        &self.cache
    }

    pub fn sources(&self) -> Vec<Source> {
        self.aggregator.sources()
    }

    pub fn policy_version(&self) -> &str {
        self.resolver.policy().version()
    }

    /// Run one request from raw body to resolution
    ///
    /// `idempotency_key` of `None` bypasses the cache.
    pub async fn impute(
        &self,
        body: &[u8],
        idempotency_key: Option<&str>,
    ) -> ApiResult<Resolution> {
        let started = Instant::now();
        let request_id = uuid_utils::generate();

        // NORMALIZING
        let (identity, hash) = match parse_request(body) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(%request_id, error = %e, "Request rejected");
                let status = CacheStatus::Bypass;
                return Err(self.fail(request_id, None, e, status, Report::default(), started));
            }
        };

        let mut guard = AbandonGuard {
            imputer: self,
            request_id,
            identity: &identity,
            started,
            armed: true,
        };

        // Filled in only when this request runs the aggregation itself
        let report: Arc<Mutex<Report>> = Arc::default();
        let compute = {
            let aggregator = Arc::clone(&self.aggregator);
            let resolver = Arc::clone(&self.resolver);
            let identity = identity.clone();
            let report = Arc::clone(&report);
            move || async move {
                let aggregation = aggregator.collect(&identity).await;
                let decision = resolver.decide(&aggregation.evidence, uuid_utils::generate());
                let mut seen = report.lock().unwrap_or_else(PoisonError::into_inner);
                seen.traces = aggregation.traces;
                seen.rule = decision.as_ref().ok().map(|d| d.rule);
                decision.map(|d| d.resolution)
            }
        };

        // CACHE_LOOKUP / AGGREGATING / RESOLVING / CACHE_STORE
        let (result, cache_status) = match idempotency_key {
            Some(key) => {
                self.cache
                    .get_or_compute(CacheKey::new(key, hash), compute)
                    .await
            }
            None => (compute().await, CacheStatus::Bypass),
        };
        guard.armed = false;

        let report = std::mem::take(&mut *report.lock().unwrap_or_else(PoisonError::into_inner));

        match result {
            Ok(resolution) => {
                let latency_ms = duration_to_millis(started.elapsed());
                info!(
                    audit_id = %resolution.audit_id,
                    run = %identity,
                    comuna_code = %resolution.comuna_code,
                    confidence = resolution.confidence,
                    rule = ?report.rule,
                    cache = ?cache_status,
                    latency_ms,
                    "Residence imputed"
                );

                let mut event = AuditEvent::new(
                    request_id,
                    resolution.audit_id,
                    AuditOutcome::Success,
                    self.policy_version(),
                )
                .with_identity(&identity, &self.options);
                event.resolution = Some(resolution.clone());
                event.rule = report.rule;
                event.cache = cache_status;
                event.latency_ms = latency_ms;
                event.connectors = report.traces;
                self.recorder.record(&event);

                Ok(resolution)
            }
            Err(e) => Err(self.fail(request_id, Some(&identity), e, cache_status, report, started)),
        }
    }

    /// Refuse a request before it reaches the pipeline
    pub fn reject(&self, error: ImputeError, started: Instant) -> ApiError {
        let request_id = uuid_utils::generate();
        debug!(%request_id, error = %error, "Request refused");
        self.fail(request_id, None, error, CacheStatus::Bypass, Report::default(), started)
    }

    fn fail(
        &self,
        request_id: Uuid,
        identity: Option<&Identity>,
        error: ImputeError,
        cache_status: CacheStatus,
        report: Report,
        started: Instant,
    ) -> ApiError {
        let outcome = match &error {
            ImputeError::Validation(_) => AuditOutcome::ValidationError,
            ImputeError::RateLimited => AuditOutcome::RateLimited,
            ImputeError::Unauthorized(_) => AuditOutcome::AuthError,
            ImputeError::NoEvidence => {
                warn!(%request_id, "No source returned usable evidence");
                AuditOutcome::UpstreamUnavailable
            }
            ImputeError::Internal(detail) => {
                error!(%request_id, error = %detail, "Imputation failed internally");
                AuditOutcome::UpstreamUnavailable
            }
        };

        let mut event = AuditEvent::new(request_id, request_id, outcome, self.policy_version());
        if let Some(identity) = identity {
            event = event.with_identity(identity, &self.options);
        }
        event.cache = cache_status;
        event.latency_ms = duration_to_millis(started.elapsed());
        event.connectors = report.traces;
        event.message = Some(error.public_message());
        self.recorder.record(&event);

        ApiError::new(error, request_id)
    }
}

/// What the aggregation run by this request observed
#[derive(Debug, Default)]
struct Report {
    traces: Vec<ConnectorTrace>,
    rule: Option<DecisionRule>,
}

/// Records an `ABANDONED` event if the request is dropped while armed
///
/// A detached aggregation keeps running and still settles the cache; only
/// the response is lost.
struct AbandonGuard<'a> {
    imputer: &'a Imputer,
    request_id: Uuid,
    identity: &'a Identity,
    started: Instant,
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!(request_id = %self.request_id, "Client went away before the response");

        let imputer = self.imputer;
        let mut event = AuditEvent::new(
            self.request_id,
            self.request_id,
            AuditOutcome::Abandoned,
            imputer.policy_version(),
        )
        .with_identity(self.identity, &imputer.options);
        event.latency_ms = duration_to_millis(self.started.elapsed());
        event.message = Some("Request abandoned before completion".to_string());
        imputer.recorder.record(&event);
    }
}

/// Parse and normalize a request body; also returns its canonical hash
fn parse_request(body: &[u8]) -> Result<(Identity, String), ImputeError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ImputeError::Validation(format!("Request body is not valid JSON: {}", e)))?;
    let hash = body_hash(&value);

    let request: ImputeRequest = serde_json::from_value(value)
        .map_err(|e| ImputeError::Validation(format!("Invalid request body: {}", e)))?;

    let identity = Identity::normalize(
        &request.rut,
        &request.dv,
        request.name.as_deref(),
        request.last_name.as_deref(),
    )?;
    Ok((identity, hash))
}
