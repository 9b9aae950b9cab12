//! Relational user backend (SQLite through sqlx).

use super::{User, UserPatch, UserRepository};
use crate::error::{QuotaError, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct SqlUserRepository {
    pool: SqlitePool,
}

impl SqlUserRepository {
    pub async fn connect(database_url: &str) -> Result<Self> {
        tracing::info!("Opening user table at: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // An in-memory database lives only as long as its single connection.
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                first_name TEXT,
                last_name TEXT,
                last_login_time_utc DATETIME
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, first_name, last_name, last_login_time_utc
            FROM users WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }
}

#[async_trait]
impl UserRepository for SqlUserRepository {
    async fn get(&self, id: &str) -> Result<User> {
        self.find(id)
            .await?
            .ok_or_else(|| QuotaError::UserNotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            r#"
            SELECT id, first_name, last_name, last_login_time_utc
            FROM users ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn create(&self, patch: UserPatch) -> Result<User> {
        let user = User::from_patch(patch);

        sqlx::query(
            r#"
            INSERT INTO users (id, first_name, last_name, last_login_time_utc)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.last_login_time_utc)
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    async fn update(&self, id: &str, patch: UserPatch) -> Result<User> {
        let mut user = self.get(id).await?;
        user.apply(patch);

        sqlx::query(
            r#"
            UPDATE users
            SET first_name = ?2, last_name = ?3, last_login_time_utc = ?4
            WHERE id = ?1
            "#,
        )
        .bind(&user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.last_login_time_utc)
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(QuotaError::UserNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "relational"
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    first_name: Option<String>,
    last_name: Option<String>,
    last_login_time_utc: Option<NaiveDateTime>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            last_login_time_utc: row.last_login_time_utc,
        }
    }
}
