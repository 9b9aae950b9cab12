use crate::counter_store::{CounterStore, StoredCount};
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::users::{UserDto, UserRepository};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Maximum number of allowed requests per user within one window.
pub const MAX_REQUESTS: u64 = 5;

/// Length of a quota window, armed by the first request after the previous one expired.
pub const QUOTA_WINDOW: Duration = Duration::from_secs(300);

pub const QUOTA_KEY_PREFIX: &str = "quota:";

pub fn quota_key(user_id: &str) -> String {
    format!("{}{}", QUOTA_KEY_PREFIX, user_id)
}

/// What a fixed window does with the next request given the current count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStep {
    Deny,
    /// Set the counter to 1 and arm the window expiry.
    Start,
    /// Add one, leaving the expiry untouched.
    Increment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    pub max_requests: u64,
    pub window: Duration,
}

impl Default for FixedWindow {
    fn default() -> Self {
        Self {
            max_requests: MAX_REQUESTS,
            window: QUOTA_WINDOW,
        }
    }
}

impl FixedWindow {
    pub fn step(&self, count: u64) -> WindowStep {
        if count >= self.max_requests {
            WindowStep::Deny
        } else if count == 0 {
            WindowStep::Start
        } else {
            WindowStep::Increment
        }
    }

    /// Window length in whole seconds, at least one.
    pub fn window_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }
}

/// Enforces the per-user fixed-window quota.
#[derive(Clone)]
pub struct QuotaLimiter {
    store: Arc<dyn CounterStore>,
    users: Arc<dyn UserRepository>,
    metrics: MetricsCollector,
    policy: FixedWindow,
}

impl QuotaLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        users: Arc<dyn UserRepository>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            store,
            users,
            metrics,
            policy: FixedWindow::default(),
        }
    }

    pub fn policy(&self) -> &FixedWindow {
        &self.policy
    }

    /// Charge one request to `user_id`. Returns false once the window is exhausted.
    ///
    /// The user must exist; otherwise `UserNotFound` is returned and no counter
    /// is touched, whatever the shape of the id. Store failures propagate, so an
    /// outage denies by error rather than silently allowing.
    pub async fn try_consume(&self, user_id: &str) -> Result<bool> {
        self.users.get(user_id).await?;

        let key = quota_key(user_id);
        let outcome = self.store.consume(&key, &self.policy).await?;

        if let Some(raw) = &outcome.malformed {
            warn!(user_id, key = %key, value = %raw, "Unparsable quota counter, treating as 0");
        }

        if !outcome.allowed {
            warn!(user_id, count = outcome.count, "Quota exceeded");
        } else if outcome.window_started {
            info!(
                user_id,
                window_secs = self.policy.window_secs(),
                "Quota window started"
            );
        } else {
            info!(user_id, count = outcome.count, "Quota incremented");
        }

        self.metrics.record_request(user_id, outcome.allowed).await;
        Ok(outcome.allowed)
    }

    /// Current counter for one user; missing or unparsable counters read as 0.
    pub async fn current_quota(&self, user_id: &str) -> Result<u64> {
        let key = quota_key(user_id);
        let raw = self.store.get(&key).await?;
        Ok(Self::count_from(user_id, raw.as_deref()))
    }

    /// All users from the active backend, each with its current counter attached.
    ///
    /// Counter reads run concurrently; the output keeps the backend's order.
    pub async fn list_user_quotas(&self) -> Result<Vec<UserDto>> {
        let users = self.users.list().await?;

        let reads = users.iter().map(|user| self.current_quota(&user.id));
        let counts = join_all(reads).await;

        users
            .into_iter()
            .zip(counts)
            .map(|(user, count)| count.map(|count| UserDto::from(user).with_quota(count)))
            .collect()
    }

    fn count_from(user_id: &str, raw: Option<&str>) -> u64 {
        let stored = StoredCount::parse(raw);
        if let StoredCount::Malformed(value) = &stored {
            warn!(user_id, value = %value, "Error parsing quota counter, defaulting to 0");
        }
        stored.or_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter_store::MemoryCounterStore;
    use crate::error::QuotaError;
    use crate::users::memory::MemoryUserRepository;
    use crate::users::UserPatch;
    use tokio_test::{assert_err, assert_ok};

    async fn limiter_with_users(ids: &[&str]) -> (QuotaLimiter, Arc<MemoryCounterStore>) {
        let store = Arc::new(MemoryCounterStore::new());
        let users = Arc::new(MemoryUserRepository::new());
        for id in ids {
            users.insert_with_id(id, UserPatch::named("Test", id));
        }
        let limiter = QuotaLimiter::new(store.clone(), users, MetricsCollector::new());
        (limiter, store)
    }

    #[test]
    fn test_window_steps() {
        let policy = FixedWindow::default();
        assert_eq!(policy.step(0), WindowStep::Start);
        assert_eq!(policy.step(1), WindowStep::Increment);
        assert_eq!(policy.step(4), WindowStep::Increment);
        assert_eq!(policy.step(5), WindowStep::Deny);
        assert_eq!(policy.step(9), WindowStep::Deny);
        assert_eq!(policy.window_secs(), 300);
    }

    #[test]
    fn test_quota_key_format() {
        assert_eq!(quota_key("u1"), "quota:u1");
    }

    #[tokio::test]
    async fn test_five_allowed_then_denied() {
        let (limiter, store) = limiter_with_users(&["u1"]).await;

        for _ in 0..5 {
            assert!(assert_ok!(limiter.try_consume("u1").await));
        }
        assert!(!assert_ok!(limiter.try_consume("u1").await));
        assert!(!assert_ok!(limiter.try_consume("u1").await));

        assert_eq!(store.get("quota:u1").await.unwrap(), Some("5".to_string()));
    }

    #[tokio::test]
    async fn test_denial_does_not_mutate_counter() {
        let (limiter, store) = limiter_with_users(&["u1"]).await;
        store.set("quota:u1", "5").await.unwrap();

        assert!(!limiter.try_consume("u1").await.unwrap());
        assert_eq!(store.get("quota:u1").await.unwrap(), Some("5".to_string()));
    }

    #[tokio::test]
    async fn test_increment_keeps_existing_counter() {
        let (limiter, store) = limiter_with_users(&["user1"]).await;
        store.set("quota:user1", "2").await.unwrap();

        assert!(limiter.try_consume("user1").await.unwrap());
        assert_eq!(store.get("quota:user1").await.unwrap(), Some("3".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_user_is_rejected_without_counter() {
        let (limiter, store) = limiter_with_users(&["u1"]).await;

        let err = assert_err!(limiter.try_consume("ghost").await);
        assert!(matches!(err, QuotaError::UserNotFound(id) if id == "ghost"));
        assert_eq!(store.get("quota:ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_odd_id_is_not_found() {
        let (limiter, store) = limiter_with_users(&["u1"]).await;

        let err = assert_err!(limiter.try_consume("bad id").await);
        assert!(matches!(err, QuotaError::UserNotFound(id) if id == "bad id"));
        assert_eq!(store.get("quota:bad id").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_padded_counter_is_zero_on_both_paths() {
        let (limiter, store) = limiter_with_users(&["u1"]).await;
        store.set("quota:u1", " 3").await.unwrap();

        let quotas = limiter.list_user_quotas().await.unwrap();
        assert_eq!(quotas[0].quota, Some(0));

        assert!(limiter.try_consume("u1").await.unwrap());
        assert_eq!(store.get("quota:u1").await.unwrap(), Some("1".to_string()));
        assert_eq!(limiter.current_quota("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_counter_restarts_window() {
        let (limiter, store) = limiter_with_users(&["u1"]).await;
        store.set("quota:u1", "garbage").await.unwrap();

        assert!(limiter.try_consume("u1").await.unwrap());
        assert_eq!(store.get("quota:u1").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_expiry() {
        let (limiter, store) = limiter_with_users(&["u1"]).await;

        for _ in 0..5 {
            assert!(limiter.try_consume("u1").await.unwrap());
        }
        assert!(!limiter.try_consume("u1").await.unwrap());

        tokio::time::advance(QUOTA_WINDOW + Duration::from_secs(1)).await;
        assert_eq!(store.get("quota:u1").await.unwrap(), None);

        assert!(limiter.try_consume("u1").await.unwrap());
        assert_eq!(store.get("quota:u1").await.unwrap(), Some("1".to_string()));

        // The new window is a full one.
        tokio::time::advance(QUOTA_WINDOW - Duration::from_secs(1)).await;
        for _ in 0..4 {
            assert!(limiter.try_consume("u1").await.unwrap());
        }
        assert!(!limiter.try_consume("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_consumers_share_one_window() {
        let (limiter, store) = limiter_with_users(&["u1"]).await;

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.try_consume("u1").await })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 5);
        assert_eq!(store.get("quota:u1").await.unwrap(), Some("5".to_string()));
        assert_eq!(store.windows_started(), 1);
    }

    #[tokio::test]
    async fn test_list_user_quotas_in_backend_order() {
        let (limiter, store) = limiter_with_users(&["u1", "u2"]).await;
        store.set("quota:u1", "3").await.unwrap();
        store.set("quota:u2", "2").await.unwrap();

        let quotas = limiter.list_user_quotas().await.unwrap();
        let pairs: Vec<_> = quotas.iter().map(|u| (u.id.as_str(), u.quota)).collect();
        assert_eq!(pairs, vec![("u1", Some(3)), ("u2", Some(2))]);
    }

    #[tokio::test]
    async fn test_list_user_quotas_defaults_bad_counters_to_zero() {
        let (limiter, store) = limiter_with_users(&["u1", "u2"]).await;
        store.set("quota:u1", "not-a-number").await.unwrap();

        let quotas = limiter.list_user_quotas().await.unwrap();
        assert_eq!(quotas[0].quota, Some(0));
        assert_eq!(quotas[1].quota, Some(0));
    }

    #[tokio::test]
    async fn test_metrics_record_outcomes() {
        let (limiter, _store) = limiter_with_users(&["u1"]).await;
        for _ in 0..6 {
            limiter.try_consume("u1").await.unwrap();
        }

        let metrics = limiter.metrics.get_user_metrics("u1").await.unwrap();
        assert_eq!(metrics.total_requests, 6);
        assert_eq!(metrics.allowed_requests, 5);
        assert_eq!(metrics.denied_requests, 1);
    }
}
