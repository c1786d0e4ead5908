//! Sliding-expiry bookkeeping for access tokens.
//!
//! A token is valid while the time since its last use is within the expiry
//! window; every successful use restarts the window.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use trellis_core::config::TrellisConfig;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Last-access times of issued tokens.
pub trait TokenStore: Send + Sync {
    /// Record a token as used now, creating the entry if needed.
    fn issue(&self, token: &str);

    /// Refresh a live token. Returns `false` for unknown or expired tokens;
    /// an expired token is not refreshed.
    fn touch(&self, token: &str) -> bool;

    fn revoke(&self, token: &str) -> bool;
}

pub struct MemoryTokenStore {
    last_access: DashMap<String, DateTime<Utc>>,
    expiry: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryTokenStore {
    pub fn new(expiry: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            last_access: DashMap::new(),
            expiry,
            clock,
        }
    }

    pub fn from_config(config: &TrellisConfig) -> Self {
        Self::new(Duration::minutes(config.token_expiry_minutes), Arc::new(SystemClock))
    }

    pub fn len(&self) -> usize {
        self.last_access.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_access.is_empty()
    }
}

impl TokenStore for MemoryTokenStore {
    fn issue(&self, token: &str) {
        self.last_access.insert(token.to_string(), self.clock.now());
    }

    fn touch(&self, token: &str) -> bool {
        let now = self.clock.now();
        let Some(mut last) = self.last_access.get_mut(token) else {
            tracing::debug!("Access token unknown");
            return false;
        };
        // Expired entries stay; a fresh login overwrites them.
        if now - *last > self.expiry {
            tracing::debug!(idle_minutes = (now - *last).num_minutes(), "Access token expired");
            return false;
        }
        *last = now;
        true
    }

    fn revoke(&self, token: &str) -> bool {
        self.last_access.remove(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (Arc<ManualClock>, MemoryTokenStore) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryTokenStore::new(Duration::minutes(30), clock.clone());
        (clock, store)
    }

    #[test]
    fn sliding_expiry() {
        let (clock, store) = store();
        store.issue("t");

        clock.advance(Duration::minutes(29));
        assert!(store.touch("t"));
        // The window restarted at minute 29.
        clock.advance(Duration::minutes(30));
        assert!(store.touch("t"));

        clock.advance(Duration::minutes(31));
        assert!(!store.touch("t"));
    }

    #[test]
    fn expired_tokens_stay_expired() {
        let (clock, store) = store();
        store.issue("t");
        clock.advance(Duration::minutes(31));
        assert!(!store.touch("t"));
        assert!(!store.touch("t"));
        assert_eq!(store.len(), 1);

        store.issue("t");
        assert!(store.touch("t"));
    }

    #[test]
    fn unknown_and_revoked_tokens() {
        let (_, store) = store();
        assert!(!store.touch("nope"));
        store.issue("t");
        assert!(store.revoke("t"));
        assert!(!store.revoke("t"));
        assert!(!store.touch("t"));
    }
}
