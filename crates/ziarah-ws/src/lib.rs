mod handler;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use ziarah_core::auth::{self, AuthError, AuthenticatedAccount};
use ziarah_core::error::CoreError;
use ziarah_core::AppState;
use ziarah_models::gateway::{
    ErrorFrame, ERR_FORCE_LOGOUT, ERR_INVALID_TOKEN, ERR_NOT_A_MEMBER, ERR_SESSION_EXPIRED,
};

pub use handler::Channel;

pub fn gateway_router() -> Router<AppState> {
    Router::new()
        .route("/ws/chat/{group_id}", get(chat_upgrade))
        .route("/ws/tracking/{group_id}", get(tracking_upgrade))
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

async fn chat_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> Response {
    upgrade(ws, state, group_id, query, Channel::Chat).await
}

async fn tracking_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> Response {
    upgrade(ws, state, group_id, query, Channel::Tracking).await
}

/// Session and membership are settled before the protocol switch, so a
/// refused client gets a plain HTTP status instead of a dangling socket.
async fn upgrade(
    ws: WebSocketUpgrade,
    state: AppState,
    group_id: Uuid,
    query: TokenQuery,
    channel: Channel,
) -> Response {
    let account = match authorize(&state, group_id, query.token.as_deref()).await {
        Ok(account) => account,
        Err(rejection) => return rejection,
    };
    tracing::debug!(%group_id, account_id = %account.account_id, ?channel, "upgrading socket");
    ws.on_upgrade(move |socket| handler::handle_connection(socket, state, channel, group_id, account))
}

async fn authorize(
    state: &AppState,
    group_id: Uuid,
    token: Option<&str>,
) -> Result<AuthenticatedAccount, Response> {
    let token = token.unwrap_or_default();
    let account = auth::authenticate(state, token).await.map_err(|err| match err {
        AuthError::InvalidToken | AuthError::InvalidCredentials => {
            tracing::warn!(target: "security", %group_id, "socket refused: invalid or missing token");
            reject(StatusCode::UNAUTHORIZED, ERR_INVALID_TOKEN, "invalid or missing token")
        }
        AuthError::SessionExpired => {
            tracing::warn!(target: "security", %group_id, "socket refused: session expired");
            reject(StatusCode::UNAUTHORIZED, ERR_SESSION_EXPIRED, "session expired")
        }
        AuthError::SessionSuperseded => {
            tracing::warn!(target: "security", %group_id, "socket refused: session superseded");
            reject(
                StatusCode::UNAUTHORIZED,
                ERR_FORCE_LOGOUT,
                "logged in from another device",
            )
        }
        AuthError::Store(_) | AuthError::Internal(_) => {
            tracing::error!(error = %err, "session check failed during upgrade");
            reject(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "internal error")
        }
    })?;

    match ziarah_core::membership::ensure_member(&state.db, group_id, account.account_id).await {
        Ok(()) => Ok(account),
        Err(CoreError::Forbidden) => Err(reject(
            StatusCode::FORBIDDEN,
            ERR_NOT_A_MEMBER,
            "not a member of this group",
        )),
        Err(err) => {
            tracing::error!(error = %err, "membership check failed during upgrade");
            Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "internal error"))
        }
    }
}

fn reject(status: StatusCode, code: &'static str, message: &'static str) -> Response {
    (status, Json(ErrorFrame::new(code, message))).into_response()
}
