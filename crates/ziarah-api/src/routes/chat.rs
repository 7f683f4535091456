use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use ziarah_core::AppState;
use ziarah_models::message::ChatMessage;

use crate::error::ApiError;
use crate::middleware::AuthUser;

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub before_id: Option<String>,
    pub limit: Option<i64>,
}

pub async fn get_history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    auth.require_member(&state, group_id).await?;
    let before_id = match query.before_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            Uuid::parse_str(raw)
                .map_err(|_| ApiError::BadRequest("before_id must be a message id".into()))?,
        ),
    };
    let messages = state.chat.history(group_id, before_id, query.limit).await?;
    Ok(Json(messages))
}

pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((group_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ChatMessage>, ApiError> {
    let deleted = state
        .chat
        .delete(group_id, message_id, auth.account_id())
        .await?;
    tracing::info!(%group_id, %message_id, "message deleted by sender");
    Ok(Json(deleted))
}
