//! Chat bridge webhook
//!
//! The bridge signs each event body with the shared webhook secret. Events
//! are verified before they reach the transport's subscribers.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    transport::{BridgeEvent, SIGNATURE_HEADER},
};

pub async fn bridge_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let Some(bridge) = state.bridge.as_ref() else {
        return Err(ApiError::NotFound);
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::InvalidSignature)?;

    if !bridge.verify_signature(&body, signature) {
        tracing::warn!("Rejected bridge event: signature mismatch");
        return Err(ApiError::InvalidSignature);
    }

    let event: BridgeEvent = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "Rejected bridge event: malformed body");
        ApiError::BadRequest("Malformed bridge event".to_string())
    })?;

    let delivered = bridge.ingest(event);
    tracing::debug!(listeners = delivered, "Bridge event dispatched");

    Ok(StatusCode::NO_CONTENT)
}
