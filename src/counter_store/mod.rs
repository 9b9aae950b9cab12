//! Key-value storage for quota counters.
//!
//! Every backend offers plain `get`/`set`/`increment`/`expire` plus one
//! compound operation, [`CounterStore::consume`], which evaluates a fixed
//! window step atomically per key. Concurrent requests for the same user
//! must never lose an update or open two windows.

pub mod memory;
pub mod redis;

use crate::error::Result;
use crate::quota::FixedWindow;
use async_trait::async_trait;
use std::time::Duration;

pub use self::memory::MemoryCounterStore;
pub use self::redis::RedisCounterStore;

/// Longest digit string accepted as a counter. Every such value fits in the
/// signed 64-bit integers Redis replies with; the consume script applies the
/// same bound.
pub const MAX_COUNTER_DIGITS: usize = 18;

/// A counter value as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredCount {
    Missing,
    Value(u64),
    /// The key holds something other than a canonical decimal of at most
    /// `MAX_COUNTER_DIGITS` digits.
    Malformed(String),
}

impl StoredCount {
    /// Only bare ASCII digits count: no sign, no whitespace, no leading zero.
    /// These are exactly the strings Redis `INCRBY` accepts and echoes back.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return StoredCount::Missing;
        };

        let digits_only = !raw.is_empty()
            && raw.len() <= MAX_COUNTER_DIGITS
            && raw.bytes().all(|b| b.is_ascii_digit())
            && (raw == "0" || !raw.starts_with('0'));

        match raw.parse::<u64>() {
            Ok(value) if digits_only => StoredCount::Value(value),
            _ => StoredCount::Malformed(raw.to_string()),
        }
    }

    /// Missing and malformed counters both count as zero.
    pub fn or_zero(&self) -> u64 {
        match self {
            StoredCount::Value(value) => *value,
            StoredCount::Missing | StoredCount::Malformed(_) => 0,
        }
    }
}

/// Result of one atomic fixed-window step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOutcome {
    pub allowed: bool,
    /// Counter value after the step.
    pub count: u64,
    /// True when this call armed a new window.
    pub window_started: bool,
    /// Raw value that was found in place of a number, if any.
    pub malformed: Option<String>,
}

impl ConsumeOutcome {
    pub fn denied(count: u64) -> Self {
        Self {
            allowed: false,
            count,
            window_started: false,
            malformed: None,
        }
    }

    pub fn started(malformed: Option<String>) -> Self {
        Self {
            allowed: true,
            count: 1,
            window_started: true,
            malformed,
        }
    }

    pub fn incremented(count: u64) -> Self {
        Self {
            allowed: true,
            count,
            window_started: false,
            malformed: None,
        }
    }
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value`, discarding any expiry on the key.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Atomically add `delta`; a missing key counts as zero.
    async fn increment(&self, key: &str, delta: i64) -> Result<i64>;

    /// Arm an expiry on `key`. Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Read, decide and mutate one counter as a single atomic step.
    async fn consume(&self, key: &str, policy: &FixedWindow) -> Result<ConsumeOutcome>;

    async fn ping(&self) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}
