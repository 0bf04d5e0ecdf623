//! Identity normalization
//!
//! Turns the raw `rut`/`dv`/`name`/`last_name` fields of an impute request
//! into an immutable [`Identity`]. Normalization either succeeds completely
//! or fails with [`Error::Validation`]; there is no partially normalized
//! identity.
//!
//! # Rules
//!
//! - `rut`: trimmed, must be a non-empty ASCII digit string
//! - `dv`: trimmed, must be exactly one of `0-9`, `K`, `k`; stored uppercase
//! - `name`/`last_name`: trimmed, inner whitespace collapsed to one space,
//!   accents preserved, empty after trimming becomes `None`

use crate::{Error, Result};
use std::fmt;

/// Canonical identity of one person, built once per request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    run_number: String,
    verifier: char,
    name: Option<String>,
    last_name: Option<String>,
}

impl Identity {
    /// Validate and canonicalize raw request fields
    ///
    /// # Examples
    ///
    /// ```
    /// use rimp_common::Identity;
    ///
    /// let id = Identity::normalize(" 12345678 ", "k", Some("  José   María "), None).unwrap();
    /// assert_eq!(id.run(), "12345678-K");
    /// assert_eq!(id.name(), Some("José María"));
    ///
    /// assert!(Identity::normalize("12.345.678", "9", None, None).is_err());
    /// ```
    pub fn normalize(
        rut: &str,
        dv: &str,
        name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<Self> {
        let run_number = rut.trim();
        if run_number.is_empty() {
            return Err(Error::Validation("Field 'rut' must not be empty".to_string()));
        }
        if !run_number.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Validation(
                "Field 'rut' must contain only digits (no dots, hyphen or verifier)".to_string(),
            ));
        }

        let verifier = parse_verifier(dv)?;

        Ok(Self {
            run_number: run_number.to_string(),
            verifier,
            name: name.and_then(collapse_whitespace),
            last_name: last_name.and_then(collapse_whitespace),
        })
    }

    /// Numeric part of the RUN (the RUT, without verifier)
    pub fn run_number(&self) -> &str {
        &self.run_number
    }

    /// Verifier digit, `0`-`9` or `K`
    pub fn verifier(&self) -> char {
        self.verifier
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn last_name(&self) -> Option<&str> {
        self.last_name.as_deref()
    }

    /// Canonical RUN: `"{run_number}-{verifier}"`
    pub fn run(&self) -> String {
        format!("{}-{}", self.run_number, self.verifier)
    }

    /// RUN with all but the last three RUT digits replaced by `*`
    ///
    /// Used wherever the identity leaves the process (logs, audit events).
    pub fn masked_run(&self) -> String {
        let len = self.run_number.len();
        let keep = len.min(3);
        let masked: String = std::iter::repeat('*')
            .take(len - keep)
            .chain(self.run_number[len - keep..].chars())
            .collect();
        format!("{}-{}", masked, self.verifier)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the full RUN through Display
        write!(f, "{}", self.masked_run())
    }
}

fn parse_verifier(dv: &str) -> Result<char> {
    let dv = dv.trim();
    let mut chars = dv.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_digit() || c == 'K' || c == 'k' => {
            Ok(c.to_ascii_uppercase())
        }
        _ => Err(Error::Validation(
            "Field 'dv' must be a single character 0-9 or K".to_string(),
        )),
    }
}

/// Trim and collapse inner whitespace; `None` when nothing is left
fn collapse_whitespace(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}
