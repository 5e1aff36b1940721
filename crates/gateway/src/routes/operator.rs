//! Operator access
//!
//! The dashboard unlocks itself with a shared secret, and every operator API
//! call carries the operator bearer token. Both comparisons run in constant
//! time.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct VerifySecretRequest {
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Serialize)]
pub struct VerifySecretResponse {
    pub is_valid: bool,
}

fn constant_time_eq(given: &str, expected: &str) -> bool {
    bool::from(given.as_bytes().ct_eq(expected.as_bytes()))
}

/// Check the dashboard secret
pub async fn verify_secret(
    State(state): State<AppState>,
    Json(req): Json<VerifySecretRequest>,
) -> Json<VerifySecretResponse> {
    let is_valid =
        !req.secret.is_empty() && constant_time_eq(&req.secret, &state.config.operator_secret);
    if !is_valid {
        tracing::warn!("Operator secret verification failed");
    }
    Json(VerifySecretResponse { is_valid })
}

/// Middleware requiring `Authorization: Bearer <operator token>`
pub async fn require_operator(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    if !constant_time_eq(token, &state.config.operator_token) {
        tracing::warn!(path = %req.uri().path(), "Rejected operator request: invalid token");
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("rahasia", "rahasia"));
        assert!(!constant_time_eq("rahasia", "rahasiA"));
        assert!(!constant_time_eq("rahasia", "rahasia-panjang"));
        assert!(!constant_time_eq("", "rahasia"));
    }
}
