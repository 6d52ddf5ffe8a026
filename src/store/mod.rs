//! Shared queue store abstraction
//!
//! Every coordination between independent parties happens through a [`Store`]:
//! per-key reads and writes, change notification, and an optimistic
//! multi-key transaction. [`InMemoryStore`] is the reference implementation.

pub mod memory;
#[cfg(test)]
pub(crate) mod outage;
pub mod retry;

pub use memory::InMemoryStore;
pub use retry::with_backoff;

use crate::error::{MatchmakingError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

/// Stored values are structured JSON records
pub type Value = serde_json::Value;

/// What a transaction closure wants done with the keys it was shown
#[derive(Debug, Clone, PartialEq)]
pub enum TxDecision {
    /// Write these values, one per key in order; `None` deletes the key
    Commit(Vec<Option<Value>>),
    /// Leave everything untouched
    Abort,
}

/// Result of a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome {
    Committed(Vec<Option<Value>>),
    Aborted,
}

impl TxOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TxOutcome::Committed(_))
    }
}

/// Trait for the shared key-value store
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a single key
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Overwrite a single key
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Delete a single key, absent keys are not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// Read every key under `prefix`
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>>;

    /// Watch a key: the current value is delivered first, then every change
    fn watch(&self, key: &str) -> Result<Subscription>;

    /// Atomic compare-and-update over `keys`.
    ///
    /// `apply` sees the current values and decides; the commit only lands if
    /// none of the keys changed since that read, otherwise `apply` runs again
    /// on fresh values. `apply` must therefore be free of side effects beyond
    /// its own captured bookkeeping.
    async fn transaction(
        &self,
        keys: &[String],
        apply: &mut (dyn for<'a> FnMut(&'a [Option<Value>]) -> TxDecision + Send),
    ) -> Result<TxOutcome>;
}

/// Live change feed for one key, dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription {
    key: String,
    receiver: mpsc::UnboundedReceiver<Option<Value>>,
}

impl Subscription {
    pub fn new(key: impl Into<String>, receiver: mpsc::UnboundedReceiver<Option<Value>>) -> Self {
        Self {
            key: key.into(),
            receiver,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next value of the key (`Some(None)` when deleted), `None` once the store is gone
    pub async fn recv(&mut self) -> Option<Option<Value>> {
        self.receiver.recv().await
    }

    /// Explicit teardown
    pub fn unsubscribe(mut self) {
        self.receiver.close();
    }
}

/// Serialize a record into a store value
pub fn encode<T: Serialize>(record: &T) -> Result<Value> {
    serde_json::to_value(record).map_err(|e| {
        MatchmakingError::Serialization {
            message: e.to_string(),
        }
        .into()
    })
}

/// Deserialize a store value into a record
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        MatchmakingError::Serialization {
            message: e.to_string(),
        }
        .into()
    })
}
