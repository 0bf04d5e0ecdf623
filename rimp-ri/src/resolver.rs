//! Confidence resolution
//!
//! Reduces an [`EvidenceSet`] to one [`Resolution`]:
//!
//! 1. Group evidence by `(region_code, comuna_code)`.
//! 2. Winning group: most sources, then the best-ranked source in the
//!    policy priority list, then the most recent `observed_at`, then the
//!    lowest codes.
//! 3. `sources` lists the winning group only, in priority order.
//! 4. `address` comes from the highest-priority winner that has one.
//! 5. `confidence` comes from [`ConfidencePolicy::score`].
//!
//! [`ConfidenceResolver::decide`] also reports which of the step 2 rules
//! settled the choice, for the audit trail.
//!
//! The result depends only on the contents of the set, never on arrival
//! order.

use crate::error::ImputeError;
use rimp_common::config::PolicyConfig;
use rimp_common::{Error, EvidenceSet, Resolution, Result, Source, SourceEvidence};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_POLICY_VERSION: &str = "2025-08-20-b-lite-1";

/// Tunable scoring policy
///
/// ```text
/// agreement  = W(winners) / W(responded)
/// coverage   = min(1, W(responded) / W(registered))
/// confidence = round4(clamp01(ceiling * agreement * (floor + (1 - floor) * coverage)))
/// ```
///
/// `W` sums per-source weights (1.0 when not configured). For a fixed
/// winning group, one more agreeing source never lowers the score and one
/// more disagreeing source never raises it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidencePolicy {
    version: String,
    floor: f64,
    ceiling: f64,
    weights: BTreeMap<Source, f64>,
    priority: Vec<Source>,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            version: DEFAULT_POLICY_VERSION.to_string(),
            floor: 0.6,
            ceiling: 0.98,
            weights: BTreeMap::new(),
            priority: vec![
                Source::VitalRecords,
                Source::Sigges,
                Source::LocalDb,
                Source::Nlp,
            ],
        }
    }
}

impl ConfidencePolicy {
    /// Apply `[policy]` overrides on top of the defaults
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        let mut policy = Self::default();
        if let Some(version) = &config.version {
            policy.version = version.clone();
        }
        if let Some(floor) = config.floor {
            policy.floor = floor;
        }
        if let Some(ceiling) = config.ceiling {
            policy.ceiling = ceiling;
        }
        if let Some(priority) = &config.priority {
            policy.priority = priority.clone();
        }
        for (name, weight) in &config.weights {
            policy.weights.insert(Source::from_str(name)?, *weight);
        }
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_priority(mut self, priority: Vec<Source>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, source: Source, weight: f64) -> Self {
        self.weights.insert(source, weight);
        self
    }

    /// Reject values that would break bounding or monotonicity
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("floor", self.floor), ("ceiling", self.ceiling)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "Policy {} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        for (source, weight) in &self.weights {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(Error::Config(format!(
                    "Weight for {} must be positive, got {}",
                    source, weight
                )));
            }
        }
        if self.version.trim().is_empty() {
            return Err(Error::Config("Policy version must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn weight(&self, source: Source) -> f64 {
        self.weights.get(&source).copied().unwrap_or(1.0)
    }

    /// Position in the priority list; unlisted sources rank after all
    /// listed ones, ordered by source
    pub fn rank(&self, source: Source) -> (usize, Source) {
        let position = self
            .priority
            .iter()
            .position(|s| *s == source)
            .unwrap_or(self.priority.len());
        (position, source)
    }

    fn total_weight<'a>(&self, sources: impl IntoIterator<Item = &'a Source>) -> f64 {
        sources.into_iter().map(|s| self.weight(*s)).sum()
    }

    /// Confidence for `winners` out of `responded` out of `registered`
    pub fn score(&self, winners: &[Source], responded: &[Source], registered: &[Source]) -> f64 {
        let w_responded = self.total_weight(responded);
        if w_responded <= 0.0 {
            return 0.0;
        }
        let agreement = self.total_weight(winners) / w_responded;

        // Sources that answered without being registered still count as asked
        let extra = responded.iter().filter(|s| !registered.contains(s));
        let w_registered = self.total_weight(registered) + self.total_weight(extra);
        let coverage = (w_responded / w_registered).min(1.0);

        let raw = self.ceiling * agreement * (self.floor + (1.0 - self.floor) * coverage);
        round4(raw.clamp(0.0, 1.0))
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Rule that separated the winning group from the runner-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionRule {
    /// Every responding source reported the same comuna
    SoleCandidate,
    /// More sources than any other comuna
    Majority,
    /// Tied on count; higher-priority source
    PriorityTieBreak,
    /// Tied on count and priority; more recent observation
    RecencyTieBreak,
    /// Tied on everything else; lowest territorial code
    CodeTieBreak,
}

/// A resolution and the rule that chose it
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub resolution: Resolution,
    pub rule: DecisionRule,
}

/// Per-group summary used to pick the winner
struct Group<'a> {
    key: (&'a str, &'a str),
    members: Vec<&'a SourceEvidence>,
    best_rank: (usize, Source),
    latest: chrono::DateTime<chrono::Utc>,
}

pub struct ConfidenceResolver {
    policy: ConfidencePolicy,
}

impl ConfidenceResolver {
    pub fn new(policy: ConfidencePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ConfidencePolicy {
        &self.policy
    }

    /// Fuse an evidence set
    ///
    /// # Errors
    /// [`ImputeError::NoEvidence`] when the set is empty.
    pub fn resolve(
        &self,
        evidence: &EvidenceSet,
        audit_id: Uuid,
    ) -> std::result::Result<Resolution, ImputeError> {
        self.decide(evidence, audit_id).map(|d| d.resolution)
    }

    /// Like [`resolve`](Self::resolve), also reporting the deciding rule
    pub fn decide(
        &self,
        evidence: &EvidenceSet,
        audit_id: Uuid,
    ) -> std::result::Result<Decision, ImputeError> {
        let mut groups = self.groups(evidence);
        groups.sort_by(|a, b| compare_groups(b, a));
        let mut ranked = groups.into_iter();
        let winner = ranked.next().ok_or(ImputeError::NoEvidence)?;
        let rule = match ranked.next() {
            Some(runner_up) => deciding_rule(&winner, &runner_up),
            None => DecisionRule::SoleCandidate,
        };

        // members are already in priority order
        let head = *winner.members.first().ok_or(ImputeError::NoEvidence)?;
        let sources: Vec<Source> = winner.members.iter().map(|e| e.source).collect();
        let address = winner.members.iter().find_map(|e| e.address.clone());
        let confidence =
            self.policy
                .score(&sources, &evidence.responded(), evidence.registered());

        let resolution = Resolution {
            region: head.region.clone(),
            region_code: head.region_code.clone(),
            comuna: head.comuna.clone(),
            comuna_code: head.comuna_code.clone(),
            address,
            confidence,
            sources,
            audit_id,
        };
        Ok(Decision { resolution, rule })
    }

    fn groups<'a>(&self, evidence: &'a EvidenceSet) -> Vec<Group<'a>> {
        let mut grouped: BTreeMap<(&str, &str), Vec<&SourceEvidence>> = BTreeMap::new();
        for ev in evidence.iter() {
            grouped.entry(ev.location_key()).or_default().push(ev);
        }

        grouped
            .into_iter()
            .filter_map(|(key, mut members)| {
                members.sort_by_key(|e| self.policy.rank(e.source));
                let best_rank = self.policy.rank(members.first()?.source);
                let latest = members.iter().map(|e| e.observed_at).max()?;
                Some(Group {
                    key,
                    members,
                    best_rank,
                    latest,
                })
            })
            .collect()
    }
}

/// First comparison step where `winner` beats `runner_up`
fn deciding_rule(winner: &Group<'_>, runner_up: &Group<'_>) -> DecisionRule {
    if winner.members.len() != runner_up.members.len() {
        DecisionRule::Majority
    } else if winner.best_rank != runner_up.best_rank {
        DecisionRule::PriorityTieBreak
    } else if winner.latest != runner_up.latest {
        DecisionRule::RecencyTieBreak
    } else {
        DecisionRule::CodeTieBreak
    }
}

/// Greater means more likely to win
fn compare_groups(a: &Group<'_>, b: &Group<'_>) -> Ordering {
    a.members
        .len()
        .cmp(&b.members.len())
        .then_with(|| b.best_rank.cmp(&a.best_rank))
        .then_with(|| a.latest.cmp(&b.latest))
        .then_with(|| b.key.cmp(&a.key))
}
