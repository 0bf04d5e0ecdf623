//! Deadline coordination
//!
//! One [`RequestDeadline`] per request fixes the cutoff instant. Every
//! connector call gets a [`Deadline`] of
//! `now + min(remaining, ceiling, source budget)` and a child cancellation
//! token. Firing the request cutoff cancels the parent
//! token, which signals every connector still running. Cancellation is
//! cooperative: a connector that ignores the signal still has its late
//! result dropped by the aggregator.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Derives request and connector deadlines from configured budgets
#[derive(Debug, Clone, Copy)]
pub struct DeadlineCoordinator {
    request_budget: Duration,
    connector_ceiling: Duration,
}

impl DeadlineCoordinator {
    pub fn new(request_budget: Duration, connector_ceiling: Duration) -> Self {
        Self {
            request_budget,
            connector_ceiling,
        }
    }

    /// Start the clock for one request
    pub fn start(&self) -> RequestDeadline {
        let started = Instant::now();
        RequestDeadline {
            started,
            cutoff: started + self.request_budget,
            ceiling: self.connector_ceiling,
            cancel: CancellationToken::new(),
        }
    }
}

impl Default for DeadlineCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_millis(1800), Duration::from_millis(5000))
    }
}

/// Time budget of one in-flight request
#[derive(Debug)]
pub struct RequestDeadline {
    started: Instant,
    cutoff: Instant,
    ceiling: Duration,
    cancel: CancellationToken,
}

impl RequestDeadline {
    /// Instant at which the aggregator stops waiting
    pub fn cutoff(&self) -> Instant {
        self.cutoff
    }

    pub fn remaining(&self) -> Duration {
        self.cutoff.saturating_duration_since(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Deadline for a connector call starting now
    ///
    /// `source_budget` tightens the global ceiling for one source; it can
    /// never extend it.
    pub fn connector_deadline(&self, source_budget: Option<Duration>) -> Deadline {
        let mut budget = self.remaining().min(self.ceiling);
        if let Some(source_budget) = source_budget {
            budget = budget.min(source_budget);
        }
        Deadline {
            at: Instant::now() + budget,
            cancel: self.cancel.child_token(),
        }
    }

    /// Signal every connector still running
    pub fn cancel_pending(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// What a connector receives: when to give up, and a cancellation signal
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    cancel: CancellationToken,
}

impl Deadline {
    pub fn new(at: Instant, cancel: CancellationToken) -> Self {
        Self { at, cancel }
    }

    /// Deadline `budget` from now with its own token
    pub fn after(budget: Duration) -> Self {
        Self::new(Instant::now() + budget, CancellationToken::new())
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the request cutoff fires
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}
