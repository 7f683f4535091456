use crate::{datetime_from_db_text, uuid_from_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;
use ziarah_models::user::AccountSummary;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub full_name: String,
    pub phone_number: String,
    pub password_hash: String,
    pub role: String,
    pub push_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for UserRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let id_raw: String = row.try_get("id")?;
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: uuid_from_db_text(&id_raw)?,
            full_name: row.try_get("full_name")?,
            phone_number: row.try_get("phone_number")?,
            password_hash: row.try_get("password_hash")?,
            role: row.try_get("role")?,
            push_token: row.try_get("push_token")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

impl UserRow {
    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id,
            full_name: self.full_name.clone(),
            role: self.role.clone(),
        }
    }
}

const USER_COLUMNS: &str =
    "id, full_name, phone_number, password_hash, role, push_token, created_at";

pub async fn create_user(
    pool: &DbPool,
    id: Uuid,
    full_name: &str,
    phone_number: &str,
    password_hash: &str,
    role: &str,
    push_token: Option<&str>,
) -> Result<UserRow, DbError> {
    sqlx::query(
        "INSERT INTO users (id, full_name, phone_number, password_hash, role, push_token)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(id.to_string())
    .bind(full_name)
    .bind(phone_number.trim())
    .bind(password_hash)
    .bind(role)
    .bind(push_token)
    .execute(pool)
    .await?;

    get_user_by_id(pool, id).await?.ok_or(DbError::NotFound)
}

pub async fn get_user_by_id(pool: &DbPool, id: Uuid) -> Result<Option<UserRow>, DbError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn find_by_phone(
    pool: &DbPool,
    phone_number: &str,
) -> Result<Option<UserRow>, DbError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE phone_number = $1");
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(phone_number.trim())
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Batch directory lookup. Unknown ids are silently absent from the result.
pub async fn find_by_ids(pool: &DbPool, ids: &[Uuid]) -> Result<Vec<AccountSummary>, DbError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (1..=ids.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id IN ({placeholders})");
    let mut query = sqlx::query_as::<_, UserRow>(&sql);
    for id in ids {
        query = query.bind(id.to_string());
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows.iter().map(UserRow::summary).collect())
}

pub async fn update_push_token(
    pool: &DbPool,
    id: Uuid,
    push_token: Option<&str>,
) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE users SET push_token = $1 WHERE id = $2")
        .bind(push_token.map(str::trim).filter(|t| !t.is_empty()))
        .bind(id.to_string())
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}
