//! File-backed residence table
//!
//! Records are loaded once at startup from a TOML file and kept in memory,
//! keyed by canonical RUN:
//!
//! ```toml
//! [[record]]
//! run = "12345678-9"
//! comuna_code = "02201"
//! comuna = "Calama"
//! address = "Av. Granaderos 2150"          # optional
//! observed_at = "2025-06-30T12:00:00Z"     # optional, quoted RFC 3339
//! ```

use super::Connector;
use crate::deadline::Deadline;
use crate::error::ConnectorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rimp_common::{Error, Identity, Result, Source, SourceEvidence};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct TableFile {
    #[serde(default)]
    record: Vec<LocalRecord>,
}

/// One row of the residence table
#[derive(Debug, Clone, Deserialize)]
pub struct LocalRecord {
    /// RUN as `"{rut}-{dv}"`; normalized on load
    pub run: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub region_code: String,
    #[serde(default)]
    pub comuna: String,
    pub comuna_code: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

pub struct LocalDbConnector {
    source: Source,
    records: HashMap<String, LocalRecord>,
    loaded_at: DateTime<Utc>,
}

impl LocalDbConnector {
    /// Load the table from a TOML file
    pub fn load(source: Source, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read residence table {} failed: {}", path.display(), e))
        })?;
        let connector = Self::from_toml_str(source, &content)?;
        info!(
            source = %source,
            path = %path.display(),
            records = connector.len(),
            "Residence table loaded"
        );
        Ok(connector)
    }

    pub fn from_toml_str(source: Source, content: &str) -> Result<Self> {
        let file: TableFile = toml::from_str(content)?;
        Self::from_records(source, file.record)
    }

    /// Build from in-memory records
    ///
    /// # Errors
    /// `Error::Config` when a RUN is malformed or appears twice.
    pub fn from_records(source: Source, records: Vec<LocalRecord>) -> Result<Self> {
        let mut table = HashMap::with_capacity(records.len());
        for record in records {
            let key = canonical_run(&record.run)?;
            if table.insert(key.clone(), record).is_some() {
                return Err(Error::Config(format!(
                    "Residence table lists {} twice",
                    key
                )));
            }
        }
        Ok(Self {
            source,
            records: table,
            loaded_at: Utc::now(),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn canonical_run(raw: &str) -> Result<String> {
    let (rut, dv) = raw
        .trim()
        .rsplit_once('-')
        .ok_or_else(|| Error::Config(format!("RUN {:?} must look like 12345678-9", raw)))?;
    let identity = Identity::normalize(rut, dv, None, None)
        .map_err(|e| Error::Config(format!("RUN {:?}: {}", raw, e)))?;
    Ok(identity.run())
}

#[async_trait]
impl Connector for LocalDbConnector {
    fn source(&self) -> Source {
        self.source
    }

    async fn query(
        &self,
        identity: &Identity,
        deadline: &Deadline,
    ) -> std::result::Result<SourceEvidence, ConnectorError> {
        if deadline.is_cancelled() {
            return Err(ConnectorError::Cancelled);
        }
        if deadline.is_expired() {
            return Err(ConnectorError::Timeout);
        }

        let record = self.records.get(&identity.run()).ok_or_else(|| {
            debug!(source = %self.source, run = %identity, "No local record");
            ConnectorError::NotFound
        })?;

        Ok(SourceEvidence {
            source: self.source,
            region: record.region.clone(),
            region_code: record.region_code.clone(),
            comuna: record.comuna.clone(),
            comuna_code: record.comuna_code.clone(),
            address: record.address.clone(),
            observed_at: record.observed_at.unwrap_or(self.loaded_at),
            error: None,
        })
    }
}
