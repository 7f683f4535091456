use std::sync::Arc;
use uuid::Uuid;
use ziarah_db::DbPool;
use ziarah_models::message::{ChatMessage, MessagePayload, MessageType, MAX_CONTENT_CHARS};

use crate::bus::BroadcastBus;
use crate::error::CoreError;
use crate::queue::MessageQueue;

pub const DEFAULT_HISTORY_LIMIT: i64 = ziarah_db::messages::MAX_PAGE_SIZE;

#[derive(Clone)]
pub struct ChatService {
    db: DbPool,
    queue: Arc<dyn MessageQueue>,
    bus: Arc<dyn BroadcastBus>,
}

/// Checks a client payload and returns the normalized content and type.
pub fn validate_payload(payload: &MessagePayload) -> Result<(String, MessageType), CoreError> {
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(CoreError::BadRequest("message content is empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(CoreError::BadRequest(format!(
            "message content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    let message_type = payload.message_type.unwrap_or_default();
    if message_type == MessageType::Deleted {
        return Err(CoreError::BadRequest("type DELETED is reserved".into()));
    }
    Ok((content.to_string(), message_type))
}

impl ChatService {
    pub fn new(db: DbPool, queue: Arc<dyn MessageQueue>, bus: Arc<dyn BroadcastBus>) -> Self {
        Self { db, queue, bus }
    }

    /// Creates the message, hands it to the durable queue and only then
    /// broadcasts it. A message the queue refused is never shown live.
    pub async fn send(
        &self,
        group_id: Uuid,
        sender_id: Uuid,
        payload: &MessagePayload,
    ) -> Result<ChatMessage, CoreError> {
        let (content, message_type) = validate_payload(payload)?;
        let message = ChatMessage::new(group_id, sender_id, content, message_type);

        self.queue.enqueue(&message).await?;
        self.publish(&message).await;
        tracing::debug!(message_id = %message.id, %group_id, %sender_id, "chat message accepted");
        Ok(message)
    }

    /// Sender-only soft delete. The deleted representation is rebroadcast
    /// under the same id, also when the message was already deleted.
    pub async fn delete(
        &self,
        group_id: Uuid,
        message_id: Uuid,
        requester_id: Uuid,
    ) -> Result<ChatMessage, CoreError> {
        let message = ziarah_db::messages::get_message(&self.db, message_id)
            .await?
            .filter(|m| m.group_id == group_id)
            .ok_or(CoreError::NotFound)?;
        if message.sender_id != requester_id {
            tracing::warn!(
                target: "security",
                %message_id,
                %requester_id,
                "delete refused: requester is not the sender"
            );
            return Err(CoreError::Forbidden);
        }

        let changed =
            ziarah_db::messages::soft_delete_message(&self.db, message_id, requester_id).await?;
        let deleted = message.into_deleted();
        if changed == 0 {
            tracing::debug!(%message_id, "message already deleted, rebroadcasting");
        }
        self.publish(&deleted).await;
        Ok(deleted)
    }

    pub async fn history(
        &self,
        group_id: Uuid,
        before_id: Option<Uuid>,
        limit: Option<i64>,
    ) -> Result<Vec<ChatMessage>, CoreError> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if limit <= 0 {
            return Err(CoreError::BadRequest("limit must be positive".into()));
        }
        Ok(ziarah_db::messages::list_before(&self.db, group_id, before_id, limit).await?)
    }

    /// Live fan-out is best effort; a failed publish is logged only.
    async fn publish(&self, message: &ChatMessage) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(message_id = %message.id, error = %err, "failed to encode message");
                return;
            }
        };
        if let Err(err) = self.bus.publish(message.group_id, payload).await {
            tracing::warn!(message_id = %message.id, error = %err, "broadcast failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_account, seed_group, test_state};
    use futures_util::StreamExt;
    use std::time::Duration;
    use ziarah_models::message::DELETED_CONTENT;

    fn payload(content: &str, message_type: Option<MessageType>) -> MessagePayload {
        MessagePayload {
            content: content.to_string(),
            message_type,
        }
    }

    #[test]
    fn payload_validation_bounds() {
        assert!(validate_payload(&payload("   ", None)).is_err());
        assert!(validate_payload(&payload(&"a".repeat(MAX_CONTENT_CHARS + 1), None)).is_err());
        assert!(validate_payload(&payload("x", Some(MessageType::Deleted))).is_err());

        let (content, kind) = validate_payload(&payload(" hi ", None)).unwrap();
        assert_eq!(content, "hi");
        assert_eq!(kind, MessageType::Text);
        let (_, kind) = validate_payload(&payload("help", Some(MessageType::Sos))).unwrap();
        assert_eq!(kind, MessageType::Sos);
        // Multi-byte characters count once.
        assert!(validate_payload(&payload(&"ش".repeat(MAX_CONTENT_CHARS), None)).is_ok());
    }

    #[tokio::test]
    async fn send_enqueues_then_broadcasts() {
        let state = test_state().await;
        let group = Uuid::new_v4();
        let mut sub = state.bus.subscribe(group).await.unwrap();

        let sent = state
            .chat
            .send(group, Uuid::new_v4(), &payload("labbaik", None))
            .await
            .unwrap();

        let queued = state
            .queue
            .next_delivery(Duration::from_millis(10))
            .await
            .unwrap()
            .expect("queued");
        let queued: ChatMessage = serde_json::from_str(&queued.payload).unwrap();
        assert_eq!(queued, sent);

        let live: ChatMessage = serde_json::from_str(&sub.next().await.unwrap()).unwrap();
        assert_eq!(live.id, sent.id);
    }

    #[tokio::test]
    async fn refused_enqueue_is_not_broadcast() {
        let (state, queue) = crate::test_support::test_state_with_memory_queue().await;
        queue.close().await;
        let group = Uuid::new_v4();
        let mut sub = state.bus.subscribe(group).await.unwrap();

        let err = state
            .chat
            .send(group, Uuid::new_v4(), &payload("lost", None))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Queue(_)));
        let nothing = tokio::time::timeout(Duration::from_millis(50), sub.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn delete_rules() {
        let state = test_state().await;
        let group = seed_group(&state).await;
        let sender = seed_account(&state, "Ahmad", "0811", "pw").await;
        let stranger = seed_account(&state, "Siti", "0812", "pw").await;
        let msg = ChatMessage::new(group, sender, "salah kirim", MessageType::Text);
        ziarah_db::messages::upsert_message(&state.db, &msg).await.unwrap();

        // Unknown id and wrong group are both not found.
        assert!(matches!(
            state.chat.delete(group, Uuid::new_v4(), sender).await,
            Err(CoreError::NotFound)
        ));
        assert!(matches!(
            state.chat.delete(Uuid::new_v4(), msg.id, sender).await,
            Err(CoreError::NotFound)
        ));
        assert!(matches!(
            state.chat.delete(group, msg.id, stranger).await,
            Err(CoreError::Forbidden)
        ));

        let mut sub = state.bus.subscribe(group).await.unwrap();
        let deleted = state.chat.delete(group, msg.id, sender).await.unwrap();
        assert_eq!(deleted.id, msg.id);
        assert_eq!(deleted.content, DELETED_CONTENT);
        let live: ChatMessage = serde_json::from_str(&sub.next().await.unwrap()).unwrap();
        assert_eq!(live, deleted);

        // Second delete is idempotent and rebroadcasts.
        let again = state.chat.delete(group, msg.id, sender).await.unwrap();
        assert_eq!(again, deleted);
        let live: ChatMessage = serde_json::from_str(&sub.next().await.unwrap()).unwrap();
        assert_eq!(live.id, msg.id);

        let stored = ziarah_db::messages::get_message(&state.db, msg.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.message_type, MessageType::Deleted);
        assert_eq!(stored.created_at, msg.created_at);
    }

    #[tokio::test]
    async fn history_defaults_and_rejects_bad_limit() {
        let state = test_state().await;
        let group = Uuid::new_v4();
        for i in 0..3 {
            let msg = ChatMessage::new(group, Uuid::new_v4(), format!("m{i}"), MessageType::Text);
            ziarah_db::messages::upsert_message(&state.db, &msg).await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let page = state.chat.history(group, None, None).await.unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].content, "m2");
        assert!(matches!(
            state.chat.history(group, None, Some(0)).await,
            Err(CoreError::BadRequest(_))
        ));
    }
}
