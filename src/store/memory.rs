//! In-memory store with optimistic versioned transactions

use crate::error::{MatchmakingError, Result};
use crate::store::{Store, Subscription, TxDecision, TxOutcome, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug)]
struct Slot {
    value: Value,
    version: u64,
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    watchers: HashMap<String, Vec<mpsc::UnboundedSender<Option<Value>>>>,
    /// Monotonic, so a key removed and re-created never reuses a version
    next_version: u64,
}

impl Inner {
    fn version_of(&self, key: &str) -> Option<u64> {
        self.slots.get(key).map(|slot| slot.version)
    }

    fn write(&mut self, key: &str, value: Option<Value>) {
        match value {
            Some(value) => {
                self.next_version += 1;
                self.slots.insert(
                    key.to_string(),
                    Slot {
                        value: value.clone(),
                        version: self.next_version,
                    },
                );
                self.notify(key, Some(value));
            }
            None => {
                if self.slots.remove(key).is_some() {
                    self.notify(key, None);
                }
            }
        }
    }

    fn notify(&mut self, key: &str, value: Option<Value>) {
        if let Some(senders) = self.watchers.get_mut(key) {
            senders.retain(|tx| tx.send(value.clone()).is_ok());
            if senders.is_empty() {
                self.watchers.remove(key);
            }
        }
    }
}

/// Transaction counters, for tests and the simulator
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub commits: u64,
    pub aborts: u64,
    pub conflicts: u64,
}

/// Mutex-protected map backing a single process
#[derive(Debug)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    max_transaction_retries: usize,
    commits: AtomicU64,
    aborts: AtomicU64,
    conflicts: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(25)
    }
}

impl InMemoryStore {
    /// Create a store that re-runs a conflicting transaction at most `max_transaction_retries` times
    pub fn new(max_transaction_retries: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_transaction_retries,
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }

    /// Number of live watchers on `key`
    pub fn watcher_count(&self, key: &str) -> usize {
        self.inner
            .read()
            .map(|inner| {
                inner
                    .watchers
                    .get(key)
                    .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    fn read_lock(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| {
                MatchmakingError::InternalError {
                    message: "Failed to acquire store read lock".to_string(),
                }
                .into()
            })
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| {
                MatchmakingError::InternalError {
                    message: "Failed to acquire store write lock".to_string(),
                }
                .into()
            })
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let inner = self.read_lock()?;
        Ok(inner.slots.get(key).map(|slot| slot.value.clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut inner = self.write_lock()?;
        inner.write(key, Some(value));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut inner = self.write_lock()?;
        inner.write(key, None);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let inner = self.read_lock()?;
        let mut entries: Vec<(String, Value)> = inner
            .slots
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, slot)| (key.clone(), slot.value.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    fn watch(&self, key: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.write_lock()?;

        // Snapshot and registration under one lock so no change slips between them
        let current = inner.slots.get(key).map(|slot| slot.value.clone());
        let _ = tx.send(current);
        inner.watchers.entry(key.to_string()).or_default().push(tx);

        Ok(Subscription::new(key, rx))
    }

    async fn transaction(
        &self,
        keys: &[String],
        apply: &mut (dyn for<'a> FnMut(&'a [Option<Value>]) -> TxDecision + Send),
    ) -> Result<TxOutcome> {
        for attempt in 0..=self.max_transaction_retries {
            let (current, versions): (Vec<Option<Value>>, Vec<Option<u64>>) = {
                let inner = self.read_lock()?;
                keys.iter()
                    .map(|key| {
                        (
                            inner.slots.get(key).map(|slot| slot.value.clone()),
                            inner.version_of(key),
                        )
                    })
                    .unzip()
            };

            let values = match apply(current.as_slice()) {
                TxDecision::Abort => {
                    self.aborts.fetch_add(1, Ordering::Relaxed);
                    return Ok(TxOutcome::Aborted);
                }
                TxDecision::Commit(values) => values,
            };

            if values.len() != keys.len() {
                return Err(MatchmakingError::InternalError {
                    message: format!(
                        "Transaction returned {} values for {} keys",
                        values.len(),
                        keys.len()
                    ),
                }
                .into());
            }

            let committed = {
                let mut inner = self.write_lock()?;
                let unchanged = keys
                    .iter()
                    .zip(&versions)
                    .all(|(key, version)| inner.version_of(key) == *version);

                if unchanged {
                    for ((key, old), new) in keys.iter().zip(&current).zip(&values) {
                        if old != new {
                            inner.write(key, new.clone());
                        }
                    }
                }
                unchanged
            };

            if !committed {
                self.conflicts.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Transaction on {:?} conflicted (attempt {}), re-running",
                    keys,
                    attempt + 1
                );
                tokio::task::yield_now().await;
                continue;
            }

            self.commits.fetch_add(1, Ordering::Relaxed);
            return Ok(TxOutcome::Committed(values));
        }

        warn!(
            "Transaction on {:?} gave up after {} conflicting attempts",
            keys, self.max_transaction_retries
        );
        Err(MatchmakingError::TransactionContention {
            keys: keys.join(", "),
            retries: self.max_transaction_retries,
        }
        .into())
    }
}
