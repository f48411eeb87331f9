use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CompileError;

/// Cross-process key/value store holding lock keys.
///
/// `set_nx_ex` must be atomic: of two concurrent calls for the same absent
/// key exactly one returns `true`.
pub trait LockStore: Send + Sync {
    /// Set `key` only if it is absent or expired, with a lifetime in seconds.
    fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, CompileError>;

    /// Remove `key`; `true` when something was removed.
    fn delete(&self, key: &str) -> Result<bool, CompileError>;

    /// Current value of `key` if set and not expired.
    fn get(&self, key: &str) -> Result<Option<String>, CompileError>;
}

/// Millisecond time source for expiry checks.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default()
    }
}

/// Clock advanced by hand, for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    pub fn advance_secs(&self, secs: u64) {
        self.millis.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: u64,
}

/// In-process [`LockStore`] with per-entry expiry.
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of live, unexpired keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries.iter().filter(|e| e.expires_at > now).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LockStore for MemoryStore {
    fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, CompileError> {
        let now = self.clock.now_millis();
        let fresh = StoredValue {
            value: value.to_string(),
            expires_at: now.saturating_add(ttl_secs.saturating_mul(1000)),
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().expires_at > now {
                    return Ok(false);
                }
                held.insert(fresh);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Ok(true)
            }
        }
    }

    fn delete(&self, key: &str) -> Result<bool, CompileError> {
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, stored)| stored.expires_at > now))
    }

    fn get(&self, key: &str) -> Result<Option<String>, CompileError> {
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .get(key)
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.value.clone()))
    }
}
