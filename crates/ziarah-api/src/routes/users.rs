use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use ziarah_core::AppState;

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Deserialize)]
pub struct PushTokenRequest {
    pub push_token: Option<String>,
}

/// Registers (or clears, with null) the device token used for push fan-out.
pub async fn update_push_token(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<PushTokenRequest>,
) -> Result<StatusCode, ApiError> {
    if body.push_token.as_deref().is_some_and(|t| t.len() > 4096) {
        return Err(ApiError::BadRequest("push_token is too long".into()));
    }
    ziarah_db::users::update_push_token(&state.db, auth.account_id(), body.push_token.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
