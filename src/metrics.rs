use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaMetrics {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub denied_requests: u64,
    /// Unix seconds of the latest attempt.
    pub last_request: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub global: QuotaMetrics,
    pub users: HashMap<String, QuotaMetrics>,
}

/// Per-user counts of consume attempts, kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    user_metrics: Arc<RwLock<HashMap<String, QuotaMetrics>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_request(&self, user_id: &str, allowed: bool) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut metrics = self.user_metrics.write().await;
        let user_metrics = metrics.entry(user_id.to_string()).or_default();

        user_metrics.total_requests += 1;
        user_metrics.last_request = now;
        if allowed {
            user_metrics.allowed_requests += 1;
        } else {
            user_metrics.denied_requests += 1;
        }
    }

    pub async fn get_user_metrics(&self, user_id: &str) -> Option<QuotaMetrics> {
        let metrics = self.user_metrics.read().await;
        metrics.get(user_id).cloned()
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let metrics = self.user_metrics.read().await;
        let mut global = QuotaMetrics::default();

        for user_metrics in metrics.values() {
            global.total_requests += user_metrics.total_requests;
            global.allowed_requests += user_metrics.allowed_requests;
            global.denied_requests += user_metrics.denied_requests;
            global.last_request = global.last_request.max(user_metrics.last_request);
        }

        MetricsSnapshot {
            global,
            users: metrics.clone(),
        }
    }
}
