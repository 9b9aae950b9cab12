//! In-process counter store with per-key expiry.
//!
//! Each `consume` runs under the DashMap shard lock for its key, which gives
//! the same per-key atomicity the Redis script provides.

use super::{ConsumeOutcome, CounterStore, StoredCount};
use crate::error::{QuotaError, Result};
use crate::quota::{FixedWindow, WindowStep};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct CounterEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    data: Arc<DashMap<String, CounterEntry>>,
    windows_started: Arc<AtomicU64>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of windows armed since the store was created.
    pub fn windows_started(&self) -> u64 {
        self.windows_started.load(Ordering::Relaxed)
    }

    /// Drop every expired key; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.data.len())
    }

    fn start_window(&self, policy: &FixedWindow, now: Instant) -> CounterEntry {
        self.windows_started.fetch_add(1, Ordering::Relaxed);
        CounterEntry {
            value: "1".to_string(),
            expires_at: Some(now + Duration::from_secs(policy.window_secs())),
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        if let Some(entry) = self.data.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.data.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.data.insert(
            key.to_string(),
            CounterEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        let now = Instant::now();
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| CounterEntry {
            value: "0".to_string(),
            expires_at: None,
        });

        if entry.is_expired(now) {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }

        // Same acceptance as Redis: the value must print back unchanged.
        let current = entry
            .value
            .parse::<i64>()
            .ok()
            .filter(|n| n.to_string() == entry.value)
            .ok_or_else(|| {
                QuotaError::CounterStore(format!("value at '{}' is not an integer", key))
            })?;
        let updated = current + delta;
        entry.value = updated.to_string();
        Ok(updated)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.data.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.data.remove(key).is_some())
    }

    async fn consume(&self, key: &str, policy: &FixedWindow) -> Result<ConsumeOutcome> {
        let now = Instant::now();

        match self.data.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(self.start_window(policy, now));
                Ok(ConsumeOutcome::started(None))
            }
            Entry::Occupied(mut slot) => {
                let stored = if slot.get().is_expired(now) {
                    StoredCount::Missing
                } else {
                    StoredCount::parse(Some(slot.get().value.as_str()))
                };
                let count = stored.or_zero();

                match policy.step(count) {
                    WindowStep::Deny => Ok(ConsumeOutcome::denied(count)),
                    WindowStep::Start => {
                        slot.insert(self.start_window(policy, now));
                        let malformed = match stored {
                            StoredCount::Malformed(raw) => Some(raw),
                            _ => None,
                        };
                        Ok(ConsumeOutcome::started(malformed))
                    }
                    WindowStep::Increment => {
                        let updated = count + 1;
                        slot.get_mut().value = updated.to_string();
                        Ok(ConsumeOutcome::incremented(updated))
                    }
                }
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
