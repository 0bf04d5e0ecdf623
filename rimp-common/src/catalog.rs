//! Territorial catalog
//!
//! Maps Chilean territorial codes (CUT) to canonical names. A comuna code is
//! five digits; its first two digits are the region code. Region names are
//! compiled in; comuna names are optional and loaded from a TOML file:
//!
//! ```toml
//! [[comuna]]
//! code = "02201"
//! name = "Calama"
//! ```
//!
//! Every piece of evidence passes through [`Catalog::canonicalize`] before it
//! is fused, so that two sources spelling the same comuna differently still
//! land in the same group.

use crate::{Error, Result, SourceEvidence};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

static REGIONS: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("01", "Tarapacá"),
        ("02", "Antofagasta"),
        ("03", "Atacama"),
        ("04", "Coquimbo"),
        ("05", "Valparaíso"),
        ("06", "Libertador General Bernardo O'Higgins"),
        ("07", "Maule"),
        ("08", "Biobío"),
        ("09", "La Araucanía"),
        ("10", "Los Lagos"),
        ("11", "Aysén del General Carlos Ibáñez del Campo"),
        ("12", "Magallanes y de la Antártica Chilena"),
        ("13", "Metropolitana de Santiago"),
        ("14", "Los Ríos"),
        ("15", "Arica y Parinacota"),
        ("16", "Ñuble"),
    ])
});

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    comuna: Vec<ComunaEntry>,
}

#[derive(Debug, Deserialize)]
struct ComunaEntry {
    code: String,
    name: String,
}

/// Code → name lookup for regions and comunas
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    comunas: HashMap<String, String>,
}

impl Catalog {
    /// Catalog with compiled-in regions and no comuna names
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Load comuna names from a TOML catalog file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_toml_str(&content)?;
        info!(
            path = %path.display(),
            comunas = catalog.comunas.len(),
            "Territorial catalog loaded"
        );
        Ok(catalog)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content)?;
        let mut comunas = HashMap::with_capacity(file.comuna.len());
        for entry in file.comuna {
            let code = validate_comuna_code(&entry.code)?;
            let name = collapse(&entry.name)
                .ok_or_else(|| Error::Catalog(format!("Comuna {} has an empty name", code)))?;
            if comunas.insert(code.clone(), name).is_some() {
                return Err(Error::Catalog(format!("Duplicate comuna code {}", code)));
            }
        }
        Ok(Self { comunas })
    }

    pub fn region_name(&self, region_code: &str) -> Option<&'static str> {
        REGIONS.get(region_code).copied()
    }

    pub fn comuna_name(&self, comuna_code: &str) -> Option<&str> {
        self.comunas.get(comuna_code).map(String::as_str)
    }

    /// Rewrite evidence into canonical codes and names
    ///
    /// # Errors
    /// `Error::Catalog` when the comuna code is malformed, belongs to an
    /// unknown region, contradicts the reported region code, or no comuna
    /// name can be determined.
    pub fn canonicalize(&self, evidence: SourceEvidence) -> Result<SourceEvidence> {
        let comuna_code = validate_comuna_code(&evidence.comuna_code)?;
        let region_code = comuna_code[..2].to_string();

        let reported_region = evidence.region_code.trim();
        if !reported_region.is_empty() && reported_region != region_code {
            return Err(Error::Catalog(format!(
                "Region code {} contradicts comuna code {}",
                reported_region, comuna_code
            )));
        }

        // validate_comuna_code already checked the region prefix
        let region = self
            .region_name(&region_code)
            .unwrap_or_default()
            .to_string();

        let comuna = match self.comuna_name(&comuna_code) {
            Some(name) => name.to_string(),
            None => collapse(&evidence.comuna).ok_or_else(|| {
                Error::Catalog(format!("No name known for comuna {}", comuna_code))
            })?,
        };

        Ok(SourceEvidence {
            region,
            region_code,
            comuna,
            comuna_code,
            address: evidence.address.as_deref().and_then(collapse),
            ..evidence
        })
    }
}

fn validate_comuna_code(raw: &str) -> Result<String> {
    let code = raw.trim();
    if code.len() != 5 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Catalog(format!(
            "Comuna code {:?} is not a 5-digit CUT code",
            raw
        )));
    }
    if !REGIONS.contains_key(&code[..2]) {
        return Err(Error::Catalog(format!(
            "Comuna code {} belongs to unknown region {}",
            code,
            &code[..2]
        )));
    }
    Ok(code.to_string())
}

fn collapse(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}
