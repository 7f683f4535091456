use axum::{extract::State, Json};
use serde::Deserialize;
use ziarah_core::auth::LoginGrant;
use ziarah_core::AppState;

use crate::error::ApiError;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub phone_number: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginGrant>, ApiError> {
    if body.phone_number.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::BadRequest(
            "phone_number and password are required".into(),
        ));
    }
    let grant = ziarah_core::auth::login(&state, &body.phone_number, &body.password).await?;
    Ok(Json(grant))
}
