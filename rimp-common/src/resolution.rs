//! Fused residence answer
//!
//! Serialized as the `200 OK` body of `POST /impute`. Fields are
//! additive-only: never remove or rename one without a version bump.

use crate::Source;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of fusing an evidence set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub region: String,
    pub region_code: String,
    pub comuna: String,
    pub comuna_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Calibrated confidence in `[0, 1]`
    pub confidence: f64,
    /// Sources that agreed with the chosen comuna (never empty)
    pub sources: Vec<Source>,
    pub audit_id: Uuid,
}
