use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;
use ziarah_core::AppState;
use ziarah_models::location::LocationSample;

use crate::error::ApiError;
use crate::middleware::AuthUser;

pub async fn get_locations(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<Json<Vec<LocationSample>>, ApiError> {
    auth.require_member(&state, group_id).await?;
    let locations = state.tracking.group_locations(group_id).await?;
    Ok(Json(locations))
}
