//! Evidence types
//!
//! A [`SourceEvidence`] is one source's answer about where a person lives.
//! An [`EvidenceSet`] is everything that arrived for one request before the
//! cutoff, in completion order, together with the list of sources that were
//! asked. A source that timed out or failed is simply absent from the set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// External source of residence evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    /// Civil registry death certificates (DCO)
    #[serde(alias = "DCO")]
    VitalRecords,
    /// Health-guarantee case management system
    Sigges,
    /// Locally maintained residence table
    #[serde(alias = "Local_DB")]
    LocalDb,
    /// Address extraction from clinical free text
    Nlp,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::VitalRecords,
        Source::Sigges,
        Source::LocalDb,
        Source::Nlp,
    ];

    /// Wire name (matches the serde representation)
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::VitalRecords => "VITAL_RECORDS",
            Source::Sigges => "SIGGES",
            Source::LocalDb => "LOCAL_DB",
            Source::Nlp => "NLP",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = crate::Error;

    /// Case-insensitive, accepts the same aliases as deserialization
    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VITAL_RECORDS" | "DCO" => Ok(Source::VitalRecords),
            "SIGGES" => Ok(Source::Sigges),
            "LOCAL_DB" => Ok(Source::LocalDb),
            "NLP" => Ok(Source::Nlp),
            other => Err(crate::Error::Config(format!("Unknown source {:?}", other))),
        }
    }
}

/// Classification of a connector-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Deadline elapsed before the source answered
    Timeout,
    /// Source has no record for the identity
    NotFound,
    /// Source answered with unusable data
    DataQuality,
    /// Source rejected our credentials
    Auth,
    /// Source unreachable or returned a server error
    Unavailable,
    /// Still pending when the request cutoff fired
    Cancelled,
    /// Connector task crashed
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::DataQuality => "DATA_QUALITY",
            ErrorKind::Auth => "AUTH",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// One connector's answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEvidence {
    pub source: Source,
    pub region: String,
    pub region_code: String,
    pub comuna: String,
    pub comuna_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub observed_at: DateTime<Utc>,
    /// Soft problem the source reported alongside a usable answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl SourceEvidence {
    /// Grouping key used by the resolver
    pub fn location_key(&self) -> (&str, &str) {
        (&self.region_code, &self.comuna_code)
    }
}

/// Evidence collected for one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceSet {
    registered: Vec<Source>,
    entries: Vec<SourceEvidence>,
}

impl EvidenceSet {
    /// Empty set for a request that asked `registered` sources
    pub fn new(registered: Vec<Source>) -> Self {
        Self {
            registered,
            entries: Vec::new(),
        }
    }

    /// Append evidence in completion order
    ///
    /// Returns `false` (and drops the evidence) when the source already
    /// contributed to this set.
    pub fn push(&mut self, evidence: SourceEvidence) -> bool {
        if self.entries.iter().any(|e| e.source == evidence.source) {
            return false;
        }
        self.entries.push(evidence);
        true
    }

    /// Sources that were asked, whether or not they answered
    pub fn registered(&self) -> &[Source] {
        &self.registered
    }

    pub fn entries(&self) -> &[SourceEvidence] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceEvidence> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sources that answered, in completion order
    pub fn responded(&self) -> Vec<Source> {
        self.entries.iter().map(|e| e.source).collect()
    }
}
