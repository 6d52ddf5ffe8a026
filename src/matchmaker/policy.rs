//! Pairing policies: which two waiting entries to bind next

use crate::types::QueueEntry;
use std::cmp::Ordering;

/// Arrival order: `joined_at` ascending, `party_id` breaks ties
pub fn arrival_order(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    a.joined_at
        .cmp(&b.joined_at)
        .then_with(|| a.party_id.cmp(&b.party_id))
}

/// Trait for pairing policies
pub trait PairingPolicy: Send + Sync {
    /// Pick two distinct waiting entries from a snapshot, older first.
    ///
    /// Returns `None` when the snapshot holds fewer than two waiting parties.
    fn select_pair(&self, snapshot: &[QueueEntry]) -> Option<(QueueEntry, QueueEntry)>;
}

/// Strict oldest-first pairing
///
/// The two entries with the smallest `joined_at` are paired, so no party
/// waits behind a later arrival within one snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct OldestFirstPolicy;

impl OldestFirstPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl PairingPolicy for OldestFirstPolicy {
    fn select_pair(&self, snapshot: &[QueueEntry]) -> Option<(QueueEntry, QueueEntry)> {
        let mut candidates: Vec<&QueueEntry> =
            snapshot.iter().filter(|entry| entry.is_waiting()).collect();
        candidates.sort_by(|a, b| arrival_order(a, b));

        match candidates.as_slice() {
            [first, second, ..] => Some(((*first).clone(), (*second).clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn waiting(id: &str, millis: i64) -> QueueEntry {
        QueueEntry::waiting(id, at(millis))
    }

    #[test]
    fn test_fewer_than_two_candidates() {
        let policy = OldestFirstPolicy::new();
        assert!(policy.select_pair(&[]).is_none());
        assert!(policy.select_pair(&[waiting("alice", 0)]).is_none());
    }

    #[test]
    fn test_oldest_two_are_paired() {
        let policy = OldestFirstPolicy::new();
        let snapshot = vec![waiting("carol", 2), waiting("alice", 0), waiting("bob", 1)];

        let (a, b) = policy.select_pair(&snapshot).unwrap();
        assert_eq!(a.party_id, "alice");
        assert_eq!(b.party_id, "bob");
    }

    #[test]
    fn test_party_id_breaks_timestamp_ties() {
        let policy = OldestFirstPolicy::new();
        let snapshot = vec![waiting("zed", 5), waiting("bob", 5), waiting("amy", 5)];

        let (a, b) = policy.select_pair(&snapshot).unwrap();
        assert_eq!(a.party_id, "amy");
        assert_eq!(b.party_id, "bob");
    }

    #[test]
    fn test_matched_entries_are_not_candidates() {
        let policy = OldestFirstPolicy::new();
        let snapshot = vec![
            waiting("alice", 0).matched("s1", "bob"),
            waiting("bob", 1).matched("s1", "alice"),
            waiting("carol", 2),
        ];
        assert!(policy.select_pair(&snapshot).is_none());

        let mut snapshot = snapshot;
        snapshot.push(waiting("dave", 3));
        let (a, b) = policy.select_pair(&snapshot).unwrap();
        assert_eq!((a.party_id.as_str(), b.party_id.as_str()), ("carol", "dave"));
    }
}
