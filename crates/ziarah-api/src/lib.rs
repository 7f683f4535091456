use axum::{
    http::{Method, StatusCode},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use ziarah_core::ratelimit::KeyedLimiter;
use ziarah_core::AppState;

pub mod error;
pub mod middleware;
pub mod routes;

use crate::middleware::{rate_limit, HttpRateLimits};

pub fn build_router() -> Router<AppState> {
    build_router_with_limits(HttpRateLimits::default())
}

/// Each call owns fresh limiters; routers never share budgets.
pub fn build_router_with_limits(limits: HttpRateLimits) -> Router<AppState> {
    let mut login = post(routes::auth::login);
    if let Some(limiter) = KeyedLimiter::per_minute(limits.logins_per_minute) {
        login = login.layer(from_fn_with_state(Arc::new(limiter), rate_limit));
    }

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/api/v1/health", get(health))
        .route("/api/v1/auth/login", login)
        .route(
            "/api/v1/users/me/push-token",
            put(routes::users::update_push_token),
        )
        .route(
            "/api/v1/groups/{group_id}/chat",
            get(routes::chat::get_history),
        )
        .route(
            "/api/v1/groups/{group_id}/chat/{message_id}",
            delete(routes::chat::delete_message),
        )
        .route(
            "/api/v1/groups/{group_id}/locations",
            get(routes::tracking::get_locations),
        );
    if let Some(limiter) = KeyedLimiter::per_minute(limits.requests_per_minute) {
        router = router.layer(from_fn_with_state(Arc::new(limiter), rate_limit));
    }
    router
        .layer(build_cors_layer())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn build_cors_layer() -> tower_http::cors::CorsLayer {
    tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "ziarah" })),
    )
}
