//! HTTP API handlers for rimp-ri
//!
//! - `POST /impute`: residence imputation
//! - `GET /health`: liveness and basic diagnostics (never authenticated)

pub mod health;
pub mod impute;

pub use health::health_routes;
pub use impute::impute_routes;
