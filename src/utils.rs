//! Utility functions for the matchmaking service

use crate::types::SessionId;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use uuid::Uuid;

/// Generate a new unique session ID
pub fn generate_session_id() -> SessionId {
    Uuid::new_v4().to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Source of `joined_at` / `created_at` timestamps
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        current_timestamp()
    }
}

/// Logical clock driven by hand, for deterministic arrival order
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Generator of session ids, fixed before the pairing transaction commits
#[cfg_attr(test, mockall::automock)]
pub trait SessionIdSource: Send + Sync {
    fn next_session_id(&self) -> SessionId;
}

/// Random v4 UUIDs
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidSessionIds;

impl SessionIdSource for UuidSessionIds {
    fn next_session_id(&self) -> SessionId {
        generate_session_id()
    }
}

/// `{prefix}1`, `{prefix}2`, ... unique within one process
#[derive(Debug)]
pub struct SequentialSessionIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialSessionIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl SessionIdSource for SequentialSessionIds {
    fn next_session_id(&self) -> SessionId {
        format!("{}{}", self.prefix, self.next.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        let id1 = generate_session_id();
        let id2 = generate_session_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialSessionIds::new("s");
        assert_eq!(ids.next_session_id(), "s1");
        assert_eq!(ids.next_session_id(), "s2");
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(0);
        let t0 = clock.now();
        clock.advance(5);
        assert_eq!((clock.now() - t0).num_milliseconds(), 5);
        clock.set(1);
        assert_eq!(clock.now().timestamp_millis(), 1);
    }
}
