use super::{User, UserPatch, UserRepository};
use crate::error::{QuotaError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// In-process user backend. Listing is ordered by id.
#[derive(Clone, Default)]
pub struct MemoryUserRepository {
    users: Arc<DashMap<String, User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user under a caller-chosen id, replacing any existing one.
    pub fn insert_with_id(&self, id: &str, patch: UserPatch) -> User {
        let mut user = User::from_patch(patch);
        user.id = id.to_string();
        self.users.insert(user.id.clone(), user.clone());
        user
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn get(&self, id: &str) -> Result<User> {
        self.users
            .get(id)
            .map(|user| user.clone())
            .ok_or_else(|| QuotaError::UserNotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.users.iter().map(|entry| entry.value().clone()).collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn create(&self, patch: UserPatch) -> Result<User> {
        let user = User::from_patch(patch);
        self.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn update(&self, id: &str, patch: UserPatch) -> Result<User> {
        let mut entry = self
            .users
            .get_mut(id)
            .ok_or_else(|| QuotaError::UserNotFound(id.to_string()))?;
        entry.apply(patch);
        Ok(entry.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.users
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| QuotaError::UserNotFound(id.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
