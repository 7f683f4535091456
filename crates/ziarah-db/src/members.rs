use crate::{uuid_from_db_text, DbError, DbPool};
use sqlx::Row;
use uuid::Uuid;

pub const STATUS_ACTIVE: &str = "ACTIVE";

#[derive(Debug, Clone)]
pub struct GroupMemberRow {
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub push_token: Option<String>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for GroupMemberRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let group_id_raw: String = row.try_get("group_id")?;
        let user_id_raw: String = row.try_get("user_id")?;
        Ok(Self {
            group_id: uuid_from_db_text(&group_id_raw)?,
            user_id: uuid_from_db_text(&user_id_raw)?,
            status: row.try_get("status")?,
            push_token: row.try_get("push_token")?,
        })
    }
}

pub async fn create_group(
    pool: &DbPool,
    id: Uuid,
    name: &str,
    join_code: Option<&str>,
) -> Result<(), DbError> {
    sqlx::query("INSERT INTO travel_groups (id, name, join_code) VALUES ($1, $2, $3)")
        .bind(id.to_string())
        .bind(name)
        .bind(join_code)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn add_member(pool: &DbPool, group_id: Uuid, user_id: Uuid) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO group_members (group_id, user_id, status) VALUES ($1, $2, $3)
         ON CONFLICT (group_id, user_id) DO UPDATE SET status = excluded.status",
    )
    .bind(group_id.to_string())
    .bind(user_id.to_string())
    .bind(STATUS_ACTIVE)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_member_status(
    pool: &DbPool,
    group_id: Uuid,
    user_id: Uuid,
    status: &str,
) -> Result<(), DbError> {
    let result =
        sqlx::query("UPDATE group_members SET status = $1 WHERE group_id = $2 AND user_id = $3")
            .bind(status)
            .bind(group_id.to_string())
            .bind(user_id.to_string())
            .execute(pool)
            .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Only ACTIVE memberships count.
pub async fn is_member(pool: &DbPool, group_id: Uuid, user_id: Uuid) -> Result<bool, DbError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM group_members
         WHERE group_id = $1 AND user_id = $2 AND status = $3",
    )
    .bind(group_id.to_string())
    .bind(user_id.to_string())
    .bind(STATUS_ACTIVE)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Active members of a group together with their registered push token.
pub async fn get_members(pool: &DbPool, group_id: Uuid) -> Result<Vec<GroupMemberRow>, DbError> {
    let rows = sqlx::query_as::<_, GroupMemberRow>(
        "SELECT gm.group_id, gm.user_id, gm.status, u.push_token
         FROM group_members gm
         INNER JOIN users u ON u.id = gm.user_id
         WHERE gm.group_id = $1 AND gm.status = $2
         ORDER BY gm.created_at",
    )
    .bind(group_id.to_string())
    .bind(STATUS_ACTIVE)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
