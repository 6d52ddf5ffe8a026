//! Typed access to queue entries stored under `matchmaking/queue/{party_id}`
//!
//! Every mutation of an entry goes through a store transaction; plain `set`
//! and `remove` are never used on queue keys.

use crate::config::BackoffPolicy;
use crate::error::{MatchmakingError, Result};
use crate::store::{decode, encode, with_backoff, Store, Subscription, TxDecision, Value};
use crate::types::{PartyId, QueueEntry};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key prefix of all queue entries
pub const QUEUE_PREFIX: &str = "matchmaking/queue/";

/// Store key of a party's queue entry
pub fn entry_key(party_id: &str) -> String {
    format!("{}{}", QUEUE_PREFIX, party_id)
}

/// Decode a raw slot, treating undecodable records as absent
fn read_entry(value: &Option<Value>) -> Option<QueueEntry> {
    let value = value.as_ref()?;
    match decode::<QueueEntry>(value.clone()) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!("Ignoring undecodable queue entry: {}", e);
            None
        }
    }
}

/// Result of binding two entries into a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// Both entries now carry the session id
    Bound,
    /// At least one entry was missing or no longer waiting, nothing written
    Stale,
}

/// The shared waiting queue
#[derive(Clone)]
pub struct WaitingQueue {
    store: Arc<dyn Store>,
    retry: BackoffPolicy,
}

impl WaitingQueue {
    pub fn new(store: Arc<dyn Store>, retry: BackoffPolicy) -> Self {
        Self { store, retry }
    }

    /// Read one party's entry
    pub async fn entry(&self, party_id: &str) -> Result<Option<QueueEntry>> {
        let key = &entry_key(party_id);
        let store = &self.store;
        let value = with_backoff(&self.retry, "read queue entry", move || async move {
            store.get(key).await
        })
        .await?;
        Ok(read_entry(&value))
    }

    /// Every decodable entry, waiting or matched
    pub async fn entries(&self) -> Result<Vec<QueueEntry>> {
        let store = &self.store;
        let raw = with_backoff(&self.retry, "scan queue", move || async move {
            store.scan(QUEUE_PREFIX).await
        })
        .await?;

        Ok(raw
            .into_iter()
            .filter_map(|(_, value)| read_entry(&Some(value)))
            .collect())
    }

    /// Snapshot of all entries still waiting
    pub async fn waiting_entries(&self) -> Result<Vec<QueueEntry>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(QueueEntry::is_waiting)
            .collect())
    }

    /// Insert a waiting entry.
    ///
    /// Fails with `AlreadyWaiting` when another waiting entry holds the key. An
    /// entry carrying the same join token is our own earlier write whose
    /// acknowledgement got lost, and counts as success. Matched leftovers are
    /// overwritten.
    pub async fn enqueue(&self, entry: &QueueEntry) -> Result<()> {
        let keys = &[entry_key(&entry.party_id)];
        let proposed = &encode(entry)?;
        let token = entry.join_token;
        let store = &self.store;

        let already_waiting = with_backoff(&self.retry, "join", move || async move {
            let mut already_waiting = false;
            store
                .transaction(keys, &mut |current: &[Option<Value>]| {
                    already_waiting = false;
                    match read_entry(&current[0]) {
                        Some(existing) if existing.join_token == token => TxDecision::Abort,
                        Some(existing) if existing.is_waiting() => {
                            already_waiting = true;
                            TxDecision::Abort
                        }
                        _ => TxDecision::Commit(vec![Some(proposed.clone())]),
                    }
                })
                .await?;
            Ok::<_, anyhow::Error>(already_waiting)
        })
        .await?;

        if already_waiting {
            return Err(MatchmakingError::AlreadyWaiting {
                party_id: entry.party_id.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Delete the entry if it is still waiting; returns whether it was removed
    pub async fn remove_if_waiting(&self, party_id: &str) -> Result<bool> {
        let keys = &[entry_key(party_id)];
        let store = &self.store;

        let outcome = with_backoff(&self.retry, "leave", move || async move {
            store
                .transaction(keys, &mut |current: &[Option<Value>]| {
                    match read_entry(&current[0]) {
                        Some(existing) if existing.is_waiting() => TxDecision::Commit(vec![None]),
                        _ => TxDecision::Abort,
                    }
                })
                .await
        })
        .await?;

        Ok(outcome.is_committed())
    }

    /// Atomically mark both parties matched into `session_id`.
    ///
    /// Commits only if both entries exist and are waiting at transaction time.
    /// A retry that finds both already bound into `session_id` reports `Bound`.
    pub async fn bind_pair(
        &self,
        first: &str,
        second: &str,
        session_id: &str,
    ) -> Result<BindOutcome> {
        let keys = &[entry_key(first), entry_key(second)];
        let store = &self.store;

        let bound = with_backoff(&self.retry, "bind pair", move || async move {
            let mut already_bound = false;
            let outcome = store
                .transaction(keys, &mut |current: &[Option<Value>]| {
                    already_bound = false;
                    let (a, b) = match (read_entry(&current[0]), read_entry(&current[1])) {
                        (Some(a), Some(b)) => (a, b),
                        _ => return TxDecision::Abort,
                    };

                    if a.is_matched_into(session_id) && b.is_matched_into(session_id) {
                        already_bound = true;
                        return TxDecision::Abort;
                    }
                    if !(a.is_waiting() && b.is_waiting()) {
                        return TxDecision::Abort;
                    }

                    let a_matched = a.matched(session_id, &b.party_id);
                    let b_matched = b.matched(session_id, &a.party_id);
                    match (encode(&a_matched), encode(&b_matched)) {
                        (Ok(a), Ok(b)) => TxDecision::Commit(vec![Some(a), Some(b)]),
                        _ => TxDecision::Abort,
                    }
                })
                .await?;
            Ok::<_, anyhow::Error>(outcome.is_committed() || already_bound)
        })
        .await?;

        if bound {
            Ok(BindOutcome::Bound)
        } else {
            debug!(
                "Entries {} and {} no longer both waiting, {} not bound",
                first, second, session_id
            );
            Ok(BindOutcome::Stale)
        }
    }

    /// Remove the party's entry once it has seen its match into `session_id`
    pub async fn acknowledge(&self, party_id: &str, session_id: &str) -> Result<bool> {
        let keys = &[entry_key(party_id)];
        let store = &self.store;

        let outcome = with_backoff(&self.retry, "acknowledge match", move || async move {
            store
                .transaction(keys, &mut |current: &[Option<Value>]| {
                    match read_entry(&current[0]) {
                        Some(existing) if existing.is_matched_into(session_id) => {
                            TxDecision::Commit(vec![None])
                        }
                        _ => TxDecision::Abort,
                    }
                })
                .await
        })
        .await?;

        Ok(outcome.is_committed())
    }

    /// Watch one party's entry
    pub fn watch(&self, party_id: &str) -> Result<EntryWatch> {
        let subscription = self.store.watch(&entry_key(party_id))?;
        Ok(EntryWatch {
            party_id: party_id.to_string(),
            subscription,
        })
    }
}

/// Typed change feed of one queue entry
#[derive(Debug)]
pub struct EntryWatch {
    party_id: PartyId,
    subscription: Subscription,
}

impl EntryWatch {
    pub fn party_id(&self) -> &str {
        &self.party_id
    }

    /// Next state of the entry (`Some(None)` while absent), `None` once the feed is closed
    pub async fn next(&mut self) -> Option<Option<QueueEntry>> {
        let value = self.subscription.recv().await?;
        Some(read_entry(&value))
    }
}
