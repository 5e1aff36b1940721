//! Transport session control

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use antrian_shared::StatusDocument;

use crate::{
    error::{ApiError, ApiResult},
    render::credential_qr_data_url,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub success: bool,
    pub message: String,
}

/// Start (or restart) the transport in the background
///
/// Progress is reported through the status endpoint and the status socket.
pub async fn start_session(State(state): State<AppState>) -> (StatusCode, Json<StartSessionResponse>) {
    let lifecycle = state.lifecycle.clone();
    tokio::spawn(async move {
        if let Err(e) = lifecycle.start().await {
            tracing::warn!(error = %e, "Transport start failed");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(StartSessionResponse {
            success: true,
            message: "Transport starting".to_string(),
        }),
    )
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusDocument> {
    Json(state.lifecycle.status().for_display())
}

#[derive(Debug, Serialize)]
pub struct CredentialResponse {
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_data_url: Option<String>,
}

/// Credential the operator must scan, if one is pending
pub async fn get_credential(State(state): State<AppState>) -> ApiResult<Json<CredentialResponse>> {
    let Some(payload) = state.lifecycle.credential() else {
        return Ok(Json(CredentialResponse {
            payload: None,
            qr_data_url: None,
        }));
    };

    let qr_data_url = credential_qr_data_url(&payload).map_err(|e| {
        tracing::error!(error = %e, "Failed to render credential QR code");
        ApiError::Internal
    })?;

    Ok(Json(CredentialResponse {
        payload: Some(payload),
        qr_data_url: Some(qr_data_url),
    }))
}
