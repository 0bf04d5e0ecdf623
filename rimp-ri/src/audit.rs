//! Audit recording
//!
//! Exactly one [`AuditEvent`] is emitted per `POST /impute` request: on
//! success, on every failure path, and when the client goes away first.
//! The event never carries the raw RUN, only a masked form and a salted
//! hash. Names are included only when `include_names` is enabled.

use crate::aggregator::ConnectorTrace;
use crate::cache::CacheStatus;
use crate::resolver::DecisionRule;
use chrono::{DateTime, Utc};
use rimp_common::hashing::run_hash;
use rimp_common::{Identity, Resolution};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

/// Terminal state of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    ValidationError,
    RateLimited,
    AuthError,
    UpstreamUnavailable,
    /// Request dropped before it produced a response
    Abandoned,
}

/// Structured record of one request
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Unique per request, even on cache replays
    pub request_id: Uuid,
    /// The id returned to the client
    pub audit_id: Uuid,
    pub outcome: AuditOutcome,
    pub recorded_at: DateTime<Utc>,
    pub run_masked: Option<String>,
    pub run_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// `null` on failure paths
    pub resolution: Option<Resolution>,
    /// Rule that picked the winning comuna; set only where it was computed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<DecisionRule>,
    pub cache: CacheStatus,
    pub latency_ms: u64,
    /// Per-connector outcome; empty unless this request ran the aggregation
    pub connectors: Vec<ConnectorTrace>,
    pub policy_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Privacy settings for building events
#[derive(Debug, Clone)]
pub struct AuditOptions {
    pub include_names: bool,
    pub run_salt: String,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            include_names: false,
            run_salt: "rimp".to_string(),
        }
    }
}

impl AuditEvent {
    /// Event with no identity and no resolution; fill in with the setters
    pub fn new(
        request_id: Uuid,
        audit_id: Uuid,
        outcome: AuditOutcome,
        policy_version: &str,
    ) -> Self {
        Self {
            request_id,
            audit_id,
            outcome,
            recorded_at: Utc::now(),
            run_masked: None,
            run_hash: None,
            name: None,
            last_name: None,
            resolution: None,
            rule: None,
            cache: CacheStatus::Bypass,
            latency_ms: 0,
            connectors: Vec::new(),
            policy_version: policy_version.to_string(),
            message: None,
        }
    }

    pub fn with_identity(mut self, identity: &Identity, options: &AuditOptions) -> Self {
        self.run_masked = Some(identity.masked_run());
        self.run_hash = Some(run_hash(&options.run_salt, identity));
        if options.include_names {
            self.name = identity.name().map(str::to_string);
            self.last_name = identity.last_name().map(str::to_string);
        }
        self
    }
}

/// Sink for audit events
pub trait AuditRecorder: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Emits each event as one `info!` on target `rimp::audit`
#[derive(Debug, Default)]
pub struct TracingAuditRecorder;

impl AuditRecorder for TracingAuditRecorder {
    fn record(&self, event: &AuditEvent) {
        match serde_json::to_string(event) {
            Ok(json) => info!(
                target: "rimp::audit",
                audit_id = %event.audit_id,
                outcome = ?event.outcome,
                latency_ms = event.latency_ms,
                "{}",
                json
            ),
            Err(e) => warn!(
                target: "rimp::audit",
                audit_id = %event.audit_id,
                error = %e,
                "Audit event serialization failed"
            ),
        }
    }
}

/// Keeps events in memory; used by tests and diagnostics
#[derive(Debug, Default)]
pub struct MemoryAuditRecorder {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditRecorder for MemoryAuditRecorder {
    fn record(&self, event: &AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
