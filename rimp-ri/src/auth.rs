//! Bearer token authentication
//!
//! `Authorization: Bearer <token>` checked against the configured token
//! list. An empty list disables the check.

use crate::error::ImputeError;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct BearerAuth {
    tokens: HashSet<String>,
}

impl BearerAuth {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(Into::<String>::into)
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// # Errors
    /// [`ImputeError::Unauthorized`] when enabled and the header is missing,
    /// malformed, or carries an unknown token.
    pub fn verify(&self, headers: &HeaderMap) -> Result<(), ImputeError> {
        if !self.is_enabled() {
            return Ok(());
        }

        let value = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ImputeError::Unauthorized("Missing bearer token".to_string()))?;

        let token = value
            .split_once(' ')
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
            .map(|(_, token)| token.trim())
            .ok_or_else(|| {
                ImputeError::Unauthorized("Authorization must use the Bearer scheme".to_string())
            })?;

        if self.tokens.contains(token) {
            Ok(())
        } else {
            Err(ImputeError::Unauthorized("Invalid bearer token".to_string()))
        }
    }
}
