use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use ziarah_db::members::GroupMemberRow;
use ziarah_db::DbPool;
use ziarah_models::message::ChatMessage;

/// FCM multicast accepts at most this many registration tokens per call.
pub const PUSH_BATCH_SIZE: usize = 500;

pub const DEFAULT_FCM_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push transport failed: {0}")]
    Transport(String),
    #[error("push provider rejected request: {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send_push(
        &self,
        tokens: &[String],
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
    ) -> Result<(), PushError>;
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct FcmMulticast<'a> {
    registration_ids: &'a [String],
    notification: FcmNotification<'a>,
    data: &'a HashMap<String, String>,
}

pub struct FcmPushSender {
    http: reqwest::Client,
    server_key: String,
    endpoint: String,
}

impl FcmPushSender {
    pub fn new(server_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            server_key: server_key.into(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl PushSender for FcmPushSender {
    async fn send_push(
        &self,
        tokens: &[String],
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
    ) -> Result<(), PushError> {
        for batch in tokens.chunks(PUSH_BATCH_SIZE) {
            let request = FcmMulticast {
                registration_ids: batch,
                notification: FcmNotification { title, body },
                data,
            };
            let response = self
                .http
                .post(&self.endpoint)
                .header("Authorization", format!("key={}", self.server_key))
                .json(&request)
                .send()
                .await
                .map_err(|err| PushError::Transport(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(PushError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }
            tracing::debug!(recipients = batch.len(), "push batch accepted");
        }
        Ok(())
    }
}

/// Used when push is not configured; logs and drops.
pub struct DisabledPushSender;

#[async_trait]
impl PushSender for DisabledPushSender {
    async fn send_push(
        &self,
        tokens: &[String],
        title: &str,
        _body: &str,
        _data: &HashMap<String, String>,
    ) -> Result<(), PushError> {
        tracing::debug!(recipients = tokens.len(), %title, "push disabled, dropping notification");
        Ok(())
    }
}

/// Every member token except the sender's, skipping members with none.
pub fn recipient_tokens(members: &[GroupMemberRow], sender_id: Uuid) -> Vec<String> {
    members
        .iter()
        .filter(|m| m.user_id != sender_id)
        .filter_map(|m| m.push_token.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Clone)]
pub struct Notifier {
    db: DbPool,
    push: Arc<dyn PushSender>,
}

impl Notifier {
    pub fn new(db: DbPool, push: Arc<dyn PushSender>) -> Self {
        Self { db, push }
    }

    /// Failures are logged and never reach the caller.
    pub async fn notify(&self, message: &ChatMessage) {
        let members = match ziarah_db::members::get_members(&self.db, message.group_id).await {
            Ok(members) => members,
            Err(err) => {
                tracing::warn!(group_id = %message.group_id, error = %err, "failed to load members for push");
                return;
            }
        };
        let tokens = recipient_tokens(&members, message.sender_id);
        if tokens.is_empty() {
            return;
        }
        let data = HashMap::from([
            ("type".to_string(), "CHAT".to_string()),
            ("group_id".to_string(), message.group_id.to_string()),
        ]);
        if let Err(err) = self
            .push
            .send_push(&tokens, "New Message", &message.content, &data)
            .await
        {
            tracing::warn!(
                message_id = %message.id,
                recipients = tokens.len(),
                error = %err,
                "push notification failed"
            );
        }
    }

    pub fn spawn(&self, message: ChatMessage) {
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.notify(&message).await;
        });
    }
}
