use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use ziarah_api::middleware::HttpRateLimits;
use ziarah_core::notify::DisabledPushSender;
use ziarah_core::{AppConfig, AppState, Backends};
use ziarah_models::message::{ChatMessage, MessageType, DELETED_CONTENT};

struct TestContext {
    app: Router,
    state: AppState,
    group_id: Uuid,
}

impl TestContext {
    async fn new() -> anyhow::Result<Self> {
        Self::with_limits(HttpRateLimits::default()).await
    }

    async fn with_limits(limits: HttpRateLimits) -> anyhow::Result<Self> {
        let db = ziarah_db::create_pool("sqlite::memory:", 1).await?;
        ziarah_db::run_migrations(&db).await?;
        let config = AppConfig {
            jwt_secret: "integration-test-secret".to_string(),
            ..AppConfig::default()
        };
        let state = AppState::new(db, config, Backends::in_memory(Arc::new(DisabledPushSender)));

        let group_id = Uuid::new_v4();
        ziarah_db::members::create_group(&state.db, group_id, "Rombongan Madinah", None).await?;

        let app = ziarah_api::build_router_with_limits(limits).with_state(state.clone());
        Ok(Self {
            app,
            state,
            group_id,
        })
    }

    async fn create_account(&self, name: &str, phone: &str, member: bool) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        let hash = ziarah_core::auth::hash_password("IntegrationPass123!")?;
        ziarah_db::users::create_user(&self.state.db, id, name, phone, &hash, "JAMAAH", None)
            .await?;
        if member {
            ziarah_db::members::add_member(&self.state.db, self.group_id, id).await?;
        }
        Ok(id)
    }

    async fn login(&self, phone: &str) -> anyhow::Result<String> {
        let (status, body) = self
            .request_json(
                Method::POST,
                "/api/v1/auth/login",
                None,
                Some(json!({ "phone_number": phone, "password": "IntegrationPass123!" })),
            )
            .await?;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        Ok(body["token"].as_str().unwrap_or_default().to_string())
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> anyhow::Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        let request = if let Some(payload) = body {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            builder.body(Body::from(payload.to_string()))?
        } else {
            builder.body(Body::empty())?
        };

        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let body_bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let payload = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes)
                .unwrap_or_else(|_| json!({ "raw": String::from_utf8_lossy(&body_bytes) }))
        };

        Ok((status, payload))
    }

    async fn wrong_password_from(&self, client: &str) -> anyhow::Result<(StatusCode, Value)> {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", format!("{client}, 10.0.0.1"))
            .body(Body::from(
                json!({ "phone_number": "0811", "password": "tebakan" }).to_string(),
            ))?;
        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let body_bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, serde_json::from_slice(&body_bytes)?))
    }

    async fn store_message(&self, sender: Uuid, content: &str) -> anyhow::Result<ChatMessage> {
        let msg = ChatMessage::new(self.group_id, sender, content, MessageType::Text);
        ziarah_db::messages::upsert_message(&self.state.db, &msg).await?;
        Ok(msg)
    }
}

#[tokio::test]
async fn health_is_public() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let (status, body) = ctx.request_json(Method::GET, "/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn login_rejects_bad_credentials() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    ctx.create_account("Ahmad", "0811", true).await?;

    let (status, body) = ctx
        .request_json(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "phone_number": "0811", "password": "wrong" })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_CREDENTIALS");

    let (status, _) = ctx
        .request_json(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "phone_number": "", "password": "x" })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn second_login_forces_logout_of_first_token() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    ctx.create_account("Ahmad", "0811", true).await?;
    let first = ctx.login("0811").await?;
    let path = format!("/api/v1/groups/{}/chat", ctx.group_id);

    let (status, _) = ctx.request_json(Method::GET, &path, Some(&first), None).await?;
    assert_eq!(status, StatusCode::OK);

    let second = ctx.login("0811").await?;
    let (status, body) = ctx.request_json(Method::GET, &path, Some(&first), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "FORCE_LOGOUT");

    let (status, _) = ctx.request_json(Method::GET, &path, Some(&second), None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = ctx.request_json(Method::GET, &path, None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_TOKEN");
    Ok(())
}

#[tokio::test]
async fn history_is_member_only_and_paginates() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let sender = ctx.create_account("Ahmad", "0811", true).await?;
    ctx.create_account("Luar", "0899", false).await?;
    let mut ids = Vec::new();
    for i in 0..3 {
        ids.push(ctx.store_message(sender, &format!("m{i}")).await?.id);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let outsider = ctx.login("0899").await?;
    let path = format!("/api/v1/groups/{}/chat", ctx.group_id);
    let (status, body) = ctx.request_json(Method::GET, &path, Some(&outsider), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "NOT_A_MEMBER");

    let token = ctx.login("0811").await?;
    let (status, body) = ctx
        .request_json(Method::GET, &format!("{path}?limit=2"), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    let page = body.as_array().cloned().unwrap_or_default();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["content"], "m2");
    assert_eq!(page[1]["content"], "m1");

    let (status, body) = ctx
        .request_json(
            Method::GET,
            &format!("{path}?before_id={}", ids[1]),
            Some(&token),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    let page = body.as_array().cloned().unwrap_or_default();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["id"], ids[0].to_string());

    let (status, _) = ctx
        .request_json(Method::GET, &format!("{path}?before_id=nope"), Some(&token), None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn only_sender_can_delete_and_repeat_delete_is_idempotent() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let sender = ctx.create_account("Ahmad", "0811", true).await?;
    ctx.create_account("Siti", "0812", true).await?;
    let msg = ctx.store_message(sender, "salah kirim").await?;
    let path = format!("/api/v1/groups/{}/chat/{}", ctx.group_id, msg.id);

    let other = ctx.login("0812").await?;
    let (status, _) = ctx.request_json(Method::DELETE, &path, Some(&other), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let token = ctx.login("0811").await?;
    let unknown = format!("/api/v1/groups/{}/chat/{}", ctx.group_id, Uuid::new_v4());
    let (status, _) = ctx.request_json(Method::DELETE, &unknown, Some(&token), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut sub = ctx.state.bus.subscribe(ctx.group_id).await?;
    for _ in 0..2 {
        let (status, body) = ctx.request_json(Method::DELETE, &path, Some(&token), None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], msg.id.to_string());
        assert_eq!(body["type"], "DELETED");
        assert_eq!(body["content"], DELETED_CONTENT);

        let live: ChatMessage = serde_json::from_str(&sub.next().await.unwrap_or_default())?;
        assert_eq!(live.id, msg.id);
        assert!(live.is_deleted());
    }
    Ok(())
}

#[tokio::test]
async fn locations_include_directory_names() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let ahmad = ctx.create_account("Ahmad", "0811", true).await?;
    ctx.state
        .tracking
        .update_location(ctx.group_id, ahmad, 24.4672, 39.6112, 1_700_000_000_000)
        .await?;

    let token = ctx.login("0811").await?;
    let path = format!("/api/v1/groups/{}/locations", ctx.group_id);
    let (status, body) = ctx.request_json(Method::GET, &path, Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["user_id"], ahmad.to_string());
    assert_eq!(body[0]["full_name"], "Ahmad");
    assert_eq!(body[0]["role"], "JAMAAH");
    assert_eq!(body[0]["timestamp"], 1_700_000_000_000_i64);
    Ok(())
}

#[tokio::test]
async fn push_token_can_be_registered_and_cleared() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let ahmad = ctx.create_account("Ahmad", "0811", true).await?;
    let token = ctx.login("0811").await?;

    let (status, _) = ctx
        .request_json(
            Method::PUT,
            "/api/v1/users/me/push-token",
            Some(&token),
            Some(json!({ "push_token": "device-abc" })),
        )
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let user = ziarah_db::users::get_user_by_id(&ctx.state.db, ahmad).await?;
    assert_eq!(user.and_then(|u| u.push_token).as_deref(), Some("device-abc"));

    let (status, _) = ctx
        .request_json(
            Method::PUT,
            "/api/v1/users/me/push-token",
            Some(&token),
            Some(json!({ "push_token": null })),
        )
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let user = ziarah_db::users::get_user_by_id(&ctx.state.db, ahmad).await?;
    assert_eq!(user.and_then(|u| u.push_token), None);
    Ok(())
}

#[tokio::test]
async fn repeated_logins_from_one_client_are_throttled() -> anyhow::Result<()> {
    let ctx = TestContext::with_limits(HttpRateLimits {
        requests_per_minute: 0,
        logins_per_minute: 3,
    })
    .await?;
    ctx.create_account("Ahmad", "0811", true).await?;

    for _ in 0..3 {
        let (status, _) = ctx.wrong_password_from("203.0.113.7").await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, body) = ctx.wrong_password_from("203.0.113.7").await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "RATE_LIMITED");

    // Another client address keeps its own budget.
    let (status, _) = ctx.wrong_password_from("198.51.100.2").await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn general_request_budget_applies_to_every_route() -> anyhow::Result<()> {
    let ctx = TestContext::with_limits(HttpRateLimits {
        requests_per_minute: 2,
        logins_per_minute: 0,
    })
    .await?;
    for _ in 0..2 {
        let (status, _) = ctx.request_json(Method::GET, "/health", None, None).await?;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = ctx.request_json(Method::GET, "/health", None, None).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "RATE_LIMITED");
    Ok(())
}
