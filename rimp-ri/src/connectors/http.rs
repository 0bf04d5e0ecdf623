//! JSON-over-HTTP residence lookup
//!
//! `GET {base_url}/residence/{run}` with an optional bearer token. Expected
//! body:
//!
//! ```json
//! {"comuna_code": "02201", "comuna": "Calama", "region_code": "02",
//!  "region": "Antofagasta", "address": "...", "observed_at": "2025-06-30T12:00:00Z"}
//! ```
//!
//! Only `comuna_code` is required; names are filled in from the catalog.

use super::Connector;
use crate::deadline::Deadline;
use crate::error::ConnectorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rimp_common::{Error, Identity, Result, Source, SourceEvidence};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ResidenceBody {
    comuna_code: String,
    #[serde(default)]
    comuna: String,
    #[serde(default)]
    region_code: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    observed_at: Option<DateTime<Utc>>,
}

pub struct HttpConnector {
    source: Source,
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpConnector {
    pub fn new(source: Source, base_url: &str, token: Option<String>) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "Source {} base_url {:?} must be an http(s) URL",
                source, base_url
            )));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("rimp-ri/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client for {}: {}", source, e)))?;

        Ok(Self {
            source,
            client,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn url_for(&self, identity: &Identity) -> String {
        format!("{}/residence/{}", self.base_url, identity.run())
    }

    async fn fetch(
        &self,
        identity: &Identity,
        deadline: &Deadline,
    ) -> std::result::Result<SourceEvidence, ConnectorError> {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Err(ConnectorError::Timeout);
        }

        let mut request = self.client.get(self.url_for(identity)).timeout(remaining);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify)?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(ConnectorError::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ConnectorError::Auth(format!("HTTP {}", response.status())))
            }
            status => return Err(ConnectorError::Unavailable(format!("HTTP {}", status))),
        }

        let body: ResidenceBody = response.json().await.map_err(classify)?;
        debug!(source = %self.source, comuna_code = %body.comuna_code, "Residence received");

        Ok(SourceEvidence {
            source: self.source,
            region: body.region,
            region_code: body.region_code,
            comuna: body.comuna,
            comuna_code: body.comuna_code,
            address: body.address,
            observed_at: body.observed_at.unwrap_or_else(Utc::now),
            error: None,
        })
    }
}

fn classify(err: reqwest::Error) -> ConnectorError {
    if err.is_timeout() {
        ConnectorError::Timeout
    } else if err.is_decode() {
        ConnectorError::DataQuality(err.to_string())
    } else {
        ConnectorError::Unavailable(err.without_url().to_string())
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn source(&self) -> Source {
        self.source
    }

    async fn query(
        &self,
        identity: &Identity,
        deadline: &Deadline,
    ) -> std::result::Result<SourceEvidence, ConnectorError> {
        tokio::select! {
            result = self.fetch(identity, deadline) => result,
            _ = deadline.cancelled() => Err(ConnectorError::Cancelled),
        }
    }
}
