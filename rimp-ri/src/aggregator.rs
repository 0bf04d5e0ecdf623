//! Evidence aggregation
//!
//! Fans out one task per registered connector, each bounded by its own
//! deadline, and collects results until either every task has finished or
//! the request cutoff fires. At cutoff the remaining connectors are
//! cancelled and left to finish on their own; whatever they return later is
//! dropped with the task.
//!
//! Failures never abort the request. Each one becomes a [`ConnectorTrace`]
//! with an [`ErrorKind`] and the source is simply absent from the
//! [`EvidenceSet`].

use crate::connectors::{Connector, ConnectorRegistry};
use crate::deadline::DeadlineCoordinator;
use crate::error::ConnectorError;
use futures::FutureExt;
use rimp_common::time::duration_to_millis;
use rimp_common::{Catalog, ErrorKind, EvidenceSet, Identity, Source, SourceEvidence};
use serde::Serialize;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, warn};

/// Timing and outcome of one connector call, for the audit record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorTrace {
    pub source: Source,
    /// `None` when the source contributed evidence
    pub error: Option<ErrorKind>,
    pub elapsed_ms: u64,
}

/// Everything collected for one request
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub evidence: EvidenceSet,
    pub traces: Vec<ConnectorTrace>,
}

type CallResult = (Source, Result<SourceEvidence, ConnectorError>, Duration);

pub struct EvidenceAggregator {
    registry: ConnectorRegistry,
    catalog: Arc<Catalog>,
    coordinator: DeadlineCoordinator,
}

impl EvidenceAggregator {
    pub fn new(
        registry: ConnectorRegistry,
        catalog: Arc<Catalog>,
        coordinator: DeadlineCoordinator,
    ) -> Self {
        Self {
            registry,
            catalog,
            coordinator,
        }
    }

    pub fn sources(&self) -> Vec<Source> {
        self.registry.sources()
    }

    /// Query every connector and collect what arrives before the cutoff
    ///
    /// Never fails; an empty evidence set means every source failed.
    pub async fn collect(&self, identity: &Identity) -> Aggregation {
        let request = self.coordinator.start();
        let mut evidence = EvidenceSet::new(self.registry.sources());
        let mut traces = Vec::with_capacity(self.registry.len());
        let mut pending: BTreeSet<Source> = BTreeSet::new();
        let mut tasks: JoinSet<CallResult> = JoinSet::new();

        for connector in self.registry.iter() {
            let connector: Arc<dyn Connector> = Arc::clone(connector);
            let source = connector.source();
            let identity = identity.clone();
            let deadline = request.connector_deadline(self.registry.budget(source));
            pending.insert(source);

            tasks.spawn(async move {
                let started = Instant::now();
                let call = AssertUnwindSafe(connector.query(&identity, &deadline)).catch_unwind();
                let result = match timeout_at(deadline.at(), call).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(ConnectorError::Internal("connector panicked".to_string())),
                    Err(_) => Err(ConnectorError::Timeout),
                };
                (source, result, started.elapsed())
            });
        }

        let cutoff = sleep_until(request.cutoff());
        tokio::pin!(cutoff);

        loop {
            tokio::select! {
                biased;

                joined = tasks.join_next() => match joined {
                    Some(Ok((source, result, elapsed))) => {
                        pending.remove(&source);
                        let error = match self.accept(source, result) {
                            Ok(ev) => {
                                evidence.push(ev);
                                None
                            }
                            Err(kind) => Some(kind),
                        };
                        traces.push(ConnectorTrace {
                            source,
                            error,
                            elapsed_ms: duration_to_millis(elapsed),
                        });
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Connector task failed to join");
                    }
                    None => break,
                },

                _ = &mut cutoff => {
                    request.cancel_pending();
                    break;
                }
            }
        }

        // Late results must not reach the finalized evidence set
        tasks.detach_all();

        let elapsed_ms = duration_to_millis(request.elapsed());
        for source in pending {
            warn!(source = %source, elapsed_ms, "Connector still pending at cutoff, cancelled");
            traces.push(ConnectorTrace {
                source,
                error: Some(ErrorKind::Cancelled),
                elapsed_ms,
            });
        }

        debug!(
            responded = evidence.len(),
            registered = evidence.registered().len(),
            elapsed_ms,
            "Evidence collected"
        );

        Aggregation { evidence, traces }
    }

    /// Canonicalize one connector result or classify its failure
    fn accept(
        &self,
        source: Source,
        result: Result<SourceEvidence, ConnectorError>,
    ) -> Result<SourceEvidence, ErrorKind> {
        let raw = result.map_err(|e| {
            warn!(source = %source, error = %e, "Connector failed, continuing without it");
            e.kind()
        })?;

        if raw.source != source {
            warn!(
                source = %source,
                reported = %raw.source,
                "Connector reported evidence for another source, discarded"
            );
            return Err(ErrorKind::DataQuality);
        }

        self.catalog.canonicalize(raw).map_err(|e| {
            warn!(source = %source, error = %e, "Evidence rejected by catalog");
            ErrorKind::DataQuality
        })
    }
}
