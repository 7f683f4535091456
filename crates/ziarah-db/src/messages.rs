use crate::{datetime_from_db_text, datetime_to_db_text, uuid_from_db_text, DbError, DbPool};
use sqlx::Row;
use uuid::Uuid;
use ziarah_models::message::{ChatMessage, MessageType, DELETED_CONTENT};

/// Hard upper bound on one history page.
pub const MAX_PAGE_SIZE: i64 = 50;

#[derive(Debug, Clone)]
pub struct MessageRow(pub ChatMessage);

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MessageRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let id_raw: String = row.try_get("id")?;
        let group_id_raw: String = row.try_get("group_id")?;
        let sender_id_raw: String = row.try_get("sender_id")?;
        let type_raw: String = row.try_get("message_type")?;
        let created_at_raw: String = row.try_get("created_at")?;
        let message_type = MessageType::parse(&type_raw).ok_or_else(|| {
            sqlx::Error::Protocol(format!("unknown message type '{type_raw}'"))
        })?;
        Ok(Self(ChatMessage {
            id: uuid_from_db_text(&id_raw)?,
            group_id: uuid_from_db_text(&group_id_raw)?,
            sender_id: uuid_from_db_text(&sender_id_raw)?,
            content: row.try_get("content")?,
            message_type,
            created_at: datetime_from_db_text(&created_at_raw)?,
        }))
    }
}

const MESSAGE_COLUMNS: &str = "id, group_id, sender_id, content, message_type, created_at";

/// Insert keyed by message id. Returns `false` when the id already existed,
/// which makes redelivery of the same message a no-op.
pub async fn upsert_message(pool: &DbPool, message: &ChatMessage) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO messages (id, group_id, sender_id, content, message_type, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(message.id.to_string())
    .bind(message.group_id.to_string())
    .bind(message.sender_id.to_string())
    .bind(message.content.as_str())
    .bind(message.message_type.as_str())
    .bind(datetime_to_db_text(message.created_at))
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_message(pool: &DbPool, id: Uuid) -> Result<Option<ChatMessage>, DbError> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
    let row = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.0))
}

/// Newest-first page of a group's history. With a cursor, only messages
/// strictly older than the cursor message are returned; an unknown cursor
/// yields an empty page.
pub async fn list_before(
    pool: &DbPool,
    group_id: Uuid,
    before_id: Option<Uuid>,
    limit: i64,
) -> Result<Vec<ChatMessage>, DbError> {
    let limit = limit.clamp(1, MAX_PAGE_SIZE);
    let rows = match before_id {
        Some(cursor) => {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE group_id = $1
                   AND created_at < (SELECT created_at FROM messages WHERE id = $2 AND group_id = $1)
                 ORDER BY created_at DESC, id DESC
                 LIMIT $3"
            );
            sqlx::query_as::<_, MessageRow>(&sql)
                .bind(group_id.to_string())
                .bind(cursor.to_string())
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE group_id = $1
                 ORDER BY created_at DESC, id DESC
                 LIMIT $2"
            );
            sqlx::query_as::<_, MessageRow>(&sql)
                .bind(group_id.to_string())
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
    };
    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Conditional soft delete. Only the sender can flip a live message to the
/// deleted form; returns the number of rows changed (0 or 1).
pub async fn soft_delete_message(
    pool: &DbPool,
    id: Uuid,
    sender_id: Uuid,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE messages SET content = $1, message_type = $2
         WHERE id = $3 AND sender_id = $4 AND message_type <> $2",
    )
    .bind(DELETED_CONTENT)
    .bind(MessageType::Deleted.as_str())
    .bind(id.to_string())
    .bind(sender_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::migrated_pool;
    use chrono::Duration;

    fn message_at(group: Uuid, sender: Uuid, content: &str, offset_secs: i64) -> ChatMessage {
        let mut msg = ChatMessage::new(group, sender, content, MessageType::Text);
        msg.created_at = msg.created_at - Duration::seconds(100 - offset_secs);
        msg
    }

    #[tokio::test]
    async fn redelivered_message_is_stored_once() {
        let pool = migrated_pool().await;
        let msg = ChatMessage::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "assalamualaikum",
            MessageType::Text,
        );

        assert!(upsert_message(&pool, &msg).await.unwrap());
        assert!(!upsert_message(&pool, &msg).await.unwrap());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE id = $1")
            .bind(msg.id.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let stored = get_message(&pool, msg.id).await.unwrap().expect("stored");
        assert_eq!(stored.content, "assalamualaikum");
        assert_eq!(stored, msg);
    }

    #[tokio::test]
    async fn list_before_pages_newest_first() {
        let pool = migrated_pool().await;
        let group = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let mut ids = Vec::new();
        for i in 0..5 {
            let msg = message_at(group, sender, &format!("m{i}"), i);
            upsert_message(&pool, &msg).await.unwrap();
            ids.push(msg.id);
        }
        // Another group's traffic never leaks into the page.
        upsert_message(&pool, &message_at(Uuid::new_v4(), sender, "other", 10))
            .await
            .unwrap();

        let page = list_before(&pool, group, None, 2).await.unwrap();
        let contents: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3"]);

        let page = list_before(&pool, group, Some(ids[3]), 50).await.unwrap();
        let contents: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m1", "m0"]);

        assert!(list_before(&pool, group, Some(Uuid::new_v4()), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn list_before_caps_page_size() {
        let pool = migrated_pool().await;
        let group = Uuid::new_v4();
        let sender = Uuid::new_v4();
        for i in 0..60 {
            upsert_message(&pool, &message_at(group, sender, "x", i)).await.unwrap();
        }
        assert_eq!(list_before(&pool, group, None, 500).await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn soft_delete_only_touches_live_messages_of_the_sender() {
        let pool = migrated_pool().await;
        let sender = Uuid::new_v4();
        let msg = ChatMessage::new(Uuid::new_v4(), sender, "oops", MessageType::Sos);
        upsert_message(&pool, &msg).await.unwrap();

        assert_eq!(soft_delete_message(&pool, msg.id, Uuid::new_v4()).await.unwrap(), 0);
        assert_eq!(soft_delete_message(&pool, msg.id, sender).await.unwrap(), 1);
        assert_eq!(soft_delete_message(&pool, msg.id, sender).await.unwrap(), 0);

        let stored = get_message(&pool, msg.id).await.unwrap().expect("stored");
        assert_eq!(stored.content, DELETED_CONTENT);
        assert_eq!(stored.message_type, MessageType::Deleted);
        assert_eq!(stored.sender_id, sender);
    }
}
