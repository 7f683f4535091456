use uuid::Uuid;
use ziarah_db::DbPool;

use crate::error::CoreError;

/// Fails with `Forbidden` unless the account is an active member of the group.
pub async fn ensure_member(db: &DbPool, group_id: Uuid, account_id: Uuid) -> Result<(), CoreError> {
    if ziarah_db::members::is_member(db, group_id, account_id).await? {
        Ok(())
    } else {
        tracing::warn!(
            target: "security",
            %group_id,
            %account_id,
            "group access refused: not a member"
        );
        Err(CoreError::Forbidden)
    }
}
