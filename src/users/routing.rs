//! Day/night datasource selection.
//!
//! Business hours (09:00 to 17:00 UTC) are served by the relational table,
//! everything else by the document index.

use super::{User, UserPatch, UserRepository};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use std::fmt;
use std::sync::Arc;

const DAY_START_HOUR: u32 = 9;
const DAY_END_HOUR: u32 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datasource {
    Relational,
    Document,
}

impl fmt::Display for Datasource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datasource::Relational => write!(f, "relational"),
            Datasource::Document => write!(f, "document"),
        }
    }
}

/// `[09:00, 17:00)` UTC selects the relational table.
pub fn datasource_for(time: NaiveTime) -> Datasource {
    if (DAY_START_HOUR..DAY_END_HOUR).contains(&time.hour()) {
        Datasource::Relational
    } else {
        Datasource::Document
    }
}

pub type Clock = fn() -> DateTime<Utc>;

#[derive(Clone)]
pub struct RoutedUserRepository {
    relational: Arc<dyn UserRepository>,
    document: Arc<dyn UserRepository>,
    clock: Clock,
}

impl RoutedUserRepository {
    pub fn new(relational: Arc<dyn UserRepository>, document: Arc<dyn UserRepository>) -> Self {
        Self::with_clock(relational, document, Utc::now)
    }

    pub fn with_clock(
        relational: Arc<dyn UserRepository>,
        document: Arc<dyn UserRepository>,
        clock: Clock,
    ) -> Self {
        Self {
            relational,
            document,
            clock,
        }
    }

    pub fn active(&self) -> Datasource {
        datasource_for((self.clock)().time())
    }

    pub fn backend(&self, datasource: Datasource) -> &Arc<dyn UserRepository> {
        match datasource {
            Datasource::Relational => &self.relational,
            Datasource::Document => &self.document,
        }
    }

    fn current(&self) -> &Arc<dyn UserRepository> {
        let datasource = self.active();
        tracing::debug!(datasource = %datasource, "Selected user datasource");
        self.backend(datasource)
    }
}

#[async_trait]
impl UserRepository for RoutedUserRepository {
    async fn get(&self, id: &str) -> Result<User> {
        self.current().get(id).await
    }

    async fn list(&self) -> Result<Vec<User>> {
        self.current().list().await
    }

    async fn create(&self, patch: UserPatch) -> Result<User> {
        self.current().create(patch).await
    }

    async fn update(&self, id: &str, patch: UserPatch) -> Result<User> {
        self.current().update(id, patch).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.current().delete(id).await
    }

    async fn ping(&self) -> Result<()> {
        self.relational.ping().await?;
        self.document.ping().await
    }

    fn backend_name(&self) -> &'static str {
        "routed"
    }
}
