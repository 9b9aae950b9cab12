//! Document-index user backend.
//!
//! Each user is a JSON document at `users:doc:{id}`; the set `users:index`
//! holds every known id. Login times are stored as epoch milliseconds.

use super::{User, UserPatch, UserRepository};
use crate::error::{QuotaError, Result};
use async_trait::async_trait;
use chrono::DateTime;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

const INDEX_KEY: &str = "users:index";

fn document_key(id: &str) -> String {
    format!("users:doc:{}", id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDocument {
    id: String,
    first_name: Option<String>,
    last_name: Option<String>,
    last_login_time_utc: Option<i64>,
}

impl From<&User> for UserDocument {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            last_login_time_utc: user
                .last_login_time_utc
                .map(|at| at.and_utc().timestamp_millis()),
        }
    }
}

impl From<UserDocument> for User {
    fn from(doc: UserDocument) -> Self {
        Self {
            id: doc.id,
            first_name: doc.first_name,
            last_name: doc.last_name,
            last_login_time_utc: doc
                .last_login_time_utc
                .and_then(DateTime::from_timestamp_millis)
                .map(|at| at.naive_utc()),
        }
    }
}

#[derive(Clone)]
pub struct DocumentUserRepository {
    conn: ConnectionManager,
}

impl DocumentUserRepository {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn save(&self, user: &User) -> Result<()> {
        let body = serde_json::to_string(&UserDocument::from(user))?;
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(document_key(&user.id))
            .arg(body)
            .ignore()
            .cmd("SADD")
            .arg(INDEX_KEY)
            .arg(&user.id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    fn decode(raw: &str) -> Result<User> {
        let doc: UserDocument = serde_json::from_str(raw)?;
        Ok(doc.into())
    }
}

#[async_trait]
impl UserRepository for DocumentUserRepository {
    async fn get(&self, id: &str) -> Result<User> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(document_key(id))
            .query_async(&mut conn)
            .await?;

        match raw {
            Some(raw) => Self::decode(&raw),
            None => Err(QuotaError::UserNotFound(id.to_string())),
        }
    }

    async fn list(&self) -> Result<Vec<User>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(INDEX_KEY)
            .query_async(&mut conn)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        ids.sort();

        let keys: Vec<String> = ids.iter().map(|id| document_key(id)).collect();
        let docs: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        // Index entries whose document is gone are skipped.
        docs.into_iter()
            .flatten()
            .map(|raw| Self::decode(&raw))
            .collect()
    }

    async fn create(&self, patch: UserPatch) -> Result<User> {
        let user = User::from_patch(patch);
        self.save(&user).await?;
        Ok(user)
    }

    async fn update(&self, id: &str, patch: UserPatch) -> Result<User> {
        let mut user = self.get(id).await?;
        user.apply(patch);
        self.save(&user).await?;
        Ok(user)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let (deleted, _): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(document_key(id))
            .cmd("SREM")
            .arg(INDEX_KEY)
            .arg(id)
            .query_async(&mut conn)
            .await?;

        if deleted == 0 {
            return Err(QuotaError::UserNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "document"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    #[test]
    fn test_document_stores_epoch_millis() {
        let login: NaiveDateTime = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        let user = User {
            id: "u1".into(),
            first_name: Some("John".into()),
            last_name: None,
            last_login_time_utc: Some(login),
        };

        let json = serde_json::to_value(UserDocument::from(&user)).unwrap();
        assert_eq!(json["lastLoginTimeUtc"], 1_704_067_201_000_i64);
        assert_eq!(json["firstName"], "John");

        let restored: User = serde_json::from_value::<UserDocument>(json).unwrap().into();
        assert_eq!(restored, user);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            DocumentUserRepository::decode("{not json"),
            Err(QuotaError::Internal(_))
        ));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn test_crud_against_redis() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let client = redis::Client::open(url).unwrap();
        let repo = DocumentUserRepository::new(client.get_connection_manager().await.unwrap());

        let created = repo.create(UserPatch::named("Jane", "Doe")).await.unwrap();
        assert_eq!(repo.get(&created.id).await.unwrap(), created);
        assert!(repo.list().await.unwrap().iter().any(|u| u.id == created.id));

        let updated = repo
            .update(
                &created.id,
                UserPatch {
                    last_name: Some("Roe".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.last_name.as_deref(), Some("Roe"));

        repo.delete(&created.id).await.unwrap();
        assert!(matches!(repo.get(&created.id).await, Err(QuotaError::UserNotFound(_))));
    }
}
