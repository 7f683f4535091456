use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::session::{SessionStatus, SessionStoreError};
use crate::AppState;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid token")]
    InvalidToken,
    #[error("session expired")]
    SessionExpired,
    #[error("session replaced by a newer login")]
    SessionSuperseded,
    #[error(transparent)]
    Store(#[from] SessionStoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: String,
    pub sid: String,
    pub iat: i64,
    pub exp: i64,
}

/// Identity established once at the edge and handed to handlers explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedAccount {
    pub account_id: Uuid,
    pub role: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginGrant {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Internal(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|e| AuthError::Internal(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub fn create_token(claims: &Claims, secret: &str) -> Result<String, AuthError> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Internal(e.to_string()))
}

pub fn validate_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AuthError::InvalidToken)
}

/// Verifies the token signature, then asks the Session Authority whether the
/// embedded session is still the current one.
pub async fn authenticate(state: &AppState, token: &str) -> Result<AuthenticatedAccount, AuthError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::InvalidToken);
    }
    let claims = validate_token(token, &state.config.jwt_secret)?;
    match state.sessions.validate(claims.sub, &claims.sid).await? {
        SessionStatus::Active => Ok(AuthenticatedAccount {
            account_id: claims.sub,
            role: claims.role,
            session_id: claims.sid,
        }),
        SessionStatus::Expired => Err(AuthError::SessionExpired),
        SessionStatus::Superseded => {
            tracing::info!(account_id = %claims.sub, "rejected superseded session");
            Err(AuthError::SessionSuperseded)
        }
    }
}

/// Phone + password login. A successful login invalidates every earlier
/// session of the account.
pub async fn login(
    state: &AppState,
    phone_number: &str,
    password: &str,
) -> Result<LoginGrant, AuthError> {
    let user = ziarah_db::users::find_by_phone(&state.db, phone_number)
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?
        .ok_or(AuthError::InvalidCredentials)?;
    if !verify_password(password, &user.password_hash)? {
        return Err(AuthError::InvalidCredentials);
    }

    let session_id = state.sessions.issue_session(user.id).await?;
    let now = Utc::now();
    let ttl = chrono::Duration::from_std(state.sessions.ttl())
        .map_err(|e| AuthError::Internal(e.to_string()))?;
    let expires_at = now + ttl;
    let claims = Claims {
        sub: user.id,
        role: user.role,
        sid: session_id,
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
    };
    let token = create_token(&claims, &state.config.jwt_secret)?;
    tracing::info!(account_id = %user.id, "login succeeded");
    Ok(LoginGrant { token, expires_at })
}
