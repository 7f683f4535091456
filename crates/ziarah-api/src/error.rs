use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use ziarah_core::auth::AuthError;
use ziarah_core::error::CoreError;
use ziarah_models::gateway::{
    ERR_FORCE_LOGOUT, ERR_INVALID_CREDENTIALS, ERR_INVALID_TOKEN, ERR_NOT_A_MEMBER,
    ERR_RATE_LIMITED, ERR_SESSION_EXPIRED,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("{message}")]
    Unauthorized {
        code: &'static str,
        message: &'static str,
    },
    #[error("forbidden")]
    Forbidden,
    #[error("not a member of this group")]
    NotAMember,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("too many requests")]
    RateLimited,
    #[error("service unavailable")]
    Unavailable(String),
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn invalid_token() -> Self {
        ApiError::Unauthorized {
            code: ERR_INVALID_TOKEN,
            message: "invalid or missing token",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, None),
            ApiError::Unauthorized { code, .. } => (StatusCode::UNAUTHORIZED, Some(*code)),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, None),
            ApiError::NotAMember => (StatusCode::FORBIDDEN, Some(ERR_NOT_A_MEMBER)),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, Some(ERR_RATE_LIMITED)),
            ApiError::Unavailable(detail) => {
                tracing::error!("API dependency unavailable: {detail}");
                (StatusCode::SERVICE_UNAVAILABLE, None)
            }
            ApiError::Internal(err) => {
                tracing::error!("API internal error: {err:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };
        let message = self.to_string();
        let body = match code {
            Some(code) => json!({ "error": message, "message": message, "code": code }),
            None => json!({ "error": message, "message": message }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NotFound => ApiError::NotFound,
            CoreError::Forbidden => ApiError::Forbidden,
            CoreError::BadRequest(msg) => ApiError::BadRequest(msg),
            CoreError::Database(_) => ApiError::Internal(anyhow::anyhow!("database error")),
            CoreError::Queue(err) => ApiError::Unavailable(err.to_string()),
            CoreError::Bus(err) => ApiError::Unavailable(err.to_string()),
            CoreError::Presence(err) => ApiError::Unavailable(err.to_string()),
            CoreError::Internal(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl From<ziarah_db::DbError> for ApiError {
    fn from(e: ziarah_db::DbError) -> Self {
        match e {
            ziarah_db::DbError::NotFound => ApiError::NotFound,
            ziarah_db::DbError::Sqlx(_) => ApiError::Internal(anyhow::anyhow!("database error")),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => ApiError::Unauthorized {
                code: ERR_INVALID_CREDENTIALS,
                message: "invalid phone number or password",
            },
            AuthError::InvalidToken => ApiError::invalid_token(),
            AuthError::SessionExpired => ApiError::Unauthorized {
                code: ERR_SESSION_EXPIRED,
                message: "session expired, please log in again",
            },
            AuthError::SessionSuperseded => ApiError::Unauthorized {
                code: ERR_FORCE_LOGOUT,
                message: "logged in from another device",
            },
            AuthError::Store(err) => ApiError::Internal(anyhow::anyhow!("session store: {err}")),
            AuthError::Internal(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}
