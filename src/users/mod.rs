//! Users and the repositories that store them.
//!
//! Two persistent backends hold the same user set: a relational table and a
//! document index. [`routing::RoutedUserRepository`] picks one per call based
//! on the UTC time of day.

pub mod document;
pub mod memory;
pub mod relational;
pub mod routing;

use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use validator::Validate;

pub use self::document::DocumentUserRepository;
pub use self::memory::MemoryUserRepository;
pub use self::relational::SqlUserRepository;
pub use self::routing::{datasource_for, Datasource, RoutedUserRepository};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub last_login_time_utc: Option<NaiveDateTime>,
}

impl User {
    /// Build a user with a freshly generated id from client-supplied fields.
    pub fn from_patch(patch: UserPatch) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            first_name: patch.first_name,
            last_name: patch.last_name,
            last_login_time_utc: patch.last_login_time_utc,
        }
    }

    /// Overwrite only the fields present in `patch`.
    pub fn apply(&mut self, patch: UserPatch) {
        if let Some(first_name) = patch.first_name {
            self.first_name = Some(first_name);
        }
        if let Some(last_name) = patch.last_name {
            self.last_name = Some(last_name);
        }
        if let Some(last_login) = patch.last_login_time_utc {
            self.last_login_time_utc = Some(last_login);
        }
    }
}

/// Client-supplied user fields for create and update. Any `id` in the body is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[validate(length(min = 1, max = 100))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub last_name: Option<String>,
    pub last_login_time_utc: Option<NaiveDateTime>,
}

impl UserPatch {
    pub fn named(first_name: &str, last_name: &str) -> Self {
        Self {
            first_name: Some(first_name.to_string()),
            last_name: Some(last_name.to_string()),
            last_login_time_utc: None,
        }
    }
}

/// User as exposed over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_time_utc: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<u64>,
}

impl UserDto {
    pub fn with_quota(mut self, quota: u64) -> Self {
        self.quota = Some(quota);
        self
    }
}

impl From<User> for UserDto {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            last_login_time_utc: user.last_login_time_utc,
            quota: None,
        }
    }
}

/// CRUD access to a user backend. `get`, `update` and `delete` fail with
/// `UserNotFound` when the id is unknown.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<User>;

    async fn list(&self) -> Result<Vec<User>>;

    async fn create(&self, patch: UserPatch) -> Result<User>;

    async fn update(&self, id: &str, patch: UserPatch) -> Result<User>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str;
}
