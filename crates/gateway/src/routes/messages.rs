//! Operator-initiated outbound messages

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub to: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub id: String,
}

/// Send a text message to a chat user
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<SendMessageResponse>> {
    let to = req.to.as_deref().map(str::trim).unwrap_or_default();
    let message = req.message.as_deref().unwrap_or_default();
    if to.is_empty() || message.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Both 'to' and 'message' are required".to_string(),
        ));
    }

    let id = state.transport.send_text(to, message).await?;
    tracing::info!(to = %to, message_id = %id, "Operator message sent");

    Ok(Json(SendMessageResponse { success: true, id }))
}
