use std::sync::Arc;
use std::time::{Instant, SystemTime};
use serde::{Deserialize, Serialize};

use crate::counter_store::CounterStore;
use crate::error::Result;
use crate::users::UserRepository;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub counter_store: ServiceStatus,
    pub relational: ServiceStatus,
    pub document: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub backend: String,
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl ServiceStatus {
    fn from_probe(backend: &str, started: Instant, result: Result<()>) -> Self {
        let response_time_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => Self {
                backend: backend.to_string(),
                status: "healthy".to_string(),
                response_time_ms,
                error: None,
            },
            Err(e) => Self {
                backend: backend.to_string(),
                status: "unavailable".to_string(),
                response_time_ms,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

static START_TIME: std::sync::LazyLock<SystemTime> = std::sync::LazyLock::new(SystemTime::now);

#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn CounterStore>,
    relational: Arc<dyn UserRepository>,
    document: Arc<dyn UserRepository>,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn CounterStore>,
        relational: Arc<dyn UserRepository>,
        document: Arc<dyn UserRepository>,
    ) -> Self {
        // Uptime counts from the first checker, not the first request.
        std::sync::LazyLock::force(&START_TIME);
        Self {
            store,
            relational,
            document,
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let now = SystemTime::now();
        let uptime = now.duration_since(*START_TIME)
            .unwrap_or_default()
            .as_secs();

        let counter_store = self.check_counter_store().await;
        let relational = Self::check_users(&self.relational).await;
        let document = Self::check_users(&self.document).await;

        // Without counters no quota decision can be made, so the service is down.
        let overall_status = if !counter_store.is_healthy() {
            "unhealthy"
        } else if relational.is_healthy() && document.is_healthy() {
            "healthy"
        } else {
            "degraded"
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: now.duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            dependencies: DependencyStatus {
                counter_store,
                relational,
                document,
            },
        }
    }

    pub async fn check_counter_store(&self) -> ServiceStatus {
        let start = Instant::now();
        let result = self.store.ping().await;
        ServiceStatus::from_probe(self.store.backend_name(), start, result)
    }

    async fn check_users(repo: &Arc<dyn UserRepository>) -> ServiceStatus {
        let start = Instant::now();
        let result = repo.ping().await;
        ServiceStatus::from_probe(repo.backend_name(), start, result)
    }
}
