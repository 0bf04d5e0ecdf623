//! # RIMP Common Library
//!
//! Shared code for the residence imputation services including:
//! - Identity normalization (RUT/DV → canonical RUN)
//! - Evidence and resolution value types
//! - Territorial catalog (comuna/region codes and names)
//! - Request and RUN hashing
//! - Configuration loading
//! - Utility functions

pub mod catalog;
pub mod config;
pub mod error;
pub mod evidence;
pub mod hashing;
pub mod identity;
pub mod resolution;
pub mod time;
pub mod uuid_utils;

pub use catalog::Catalog;
pub use error::{Error, Result};
pub use evidence::{ErrorKind, EvidenceSet, Source, SourceEvidence};
pub use identity::Identity;
pub use resolution::Resolution;
