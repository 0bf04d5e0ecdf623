//! POST /impute

use axum::{body::Bytes, extract::State, http::HeaderMap, routing::post, Json, Router};
use rimp_common::Resolution;
use tokio::time::Instant;

use crate::error::ApiResult;
use crate::AppState;

/// Client-supplied replay key
pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

/// POST /impute
///
/// The body is taken as raw bytes so that malformed JSON is reported as
/// `422 VALIDATION_ERROR` with an audit id, like any other validation
/// failure.
pub async fn impute(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Resolution>> {
    let started = Instant::now();

    if let Err(e) = state.auth.verify(&headers) {
        return Err(state.imputer.reject(e, started));
    }
    if !state.rate_limiter.check() {
        return Err(state
            .imputer
            .reject(crate::error::ImputeError::RateLimited, started));
    }

    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty());

    state
        .imputer
        .impute(&body, idempotency_key)
        .await
        .map(Json)
}

/// Build imputation routes
pub fn impute_routes() -> Router<AppState> {
    Router::new().route("/impute", post(impute))
}
