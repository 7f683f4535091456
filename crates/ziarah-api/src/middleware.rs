use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;
use ziarah_core::auth::AuthenticatedAccount;
use ziarah_core::error::CoreError;
use ziarah_core::ratelimit::KeyedLimiter;
use ziarah_core::AppState;

use crate::error::ApiError;

/// Bearer-token identity with a live session behind it.
pub struct AuthUser(pub AuthenticatedAccount);

impl AuthUser {
    pub fn account_id(&self) -> Uuid {
        self.0.account_id
    }

    /// Maps the membership refusal onto its dedicated error code.
    pub async fn require_member(&self, state: &AppState, group_id: Uuid) -> Result<(), ApiError> {
        ziarah_core::membership::ensure_member(&state.db, group_id, self.account_id())
            .await
            .map_err(|err| match err {
                CoreError::Forbidden => ApiError::NotAMember,
                other => other.into(),
            })
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(ApiError::invalid_token)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(ApiError::invalid_token)?;

        let account = ziarah_core::auth::authenticate(state, token).await?;
        Ok(AuthUser(account))
    }
}

/// Per-client HTTP budgets. 0 disables a limit.
#[derive(Debug, Clone, Copy)]
pub struct HttpRateLimits {
    pub requests_per_minute: u32,
    /// Applied to login on top of the general budget.
    pub logins_per_minute: u32,
}

impl Default for HttpRateLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 100,
            logins_per_minute: 10,
        }
    }
}

pub type ClientLimiter = Arc<KeyedLimiter<String>>;

/// First `X-Forwarded-For` hop, else the peer address, else `local`.
fn client_key(req: &Request) -> String {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if let Some(forwarded) = forwarded {
        return forwarded.to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "local".to_string())
}

pub async fn rate_limit(State(limiter): State<ClientLimiter>, req: Request, next: Next) -> Response {
    let key = client_key(&req);
    if let Err(retry_after_ms) = limiter.check(&key) {
        tracing::warn!(
            target: "security",
            client = %key,
            path = %req.uri().path(),
            retry_after_ms,
            "request rate limited"
        );
        return ApiError::RateLimited.into_response();
    }
    next.run(req).await
}
