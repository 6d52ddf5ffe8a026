//! Store wrapper that takes one key prefix offline, for tests

use crate::error::{MatchmakingError, Result};
use crate::store::{InMemoryStore, Store, Subscription, TxDecision, TxOutcome, Value};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// Every round trip touching a key under `prefix` fails while offline
pub struct PrefixOutageStore {
    inner: InMemoryStore,
    prefix: String,
    offline: AtomicBool,
}

impl PrefixOutageStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            inner: InMemoryStore::default(),
            prefix: prefix.into(),
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self, keys: &[String]) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) && keys.iter().any(|k| k.starts_with(&self.prefix)) {
            return Err(MatchmakingError::StoreUnavailable {
                message: format!("{} offline", self.prefix),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl Store for PrefixOutageStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check(&[key.to_string()])?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check(&[key.to_string()])?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check(&[key.to_string()])?;
        self.inner.remove(key).await
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        self.check(&[prefix.to_string()])?;
        self.inner.scan(prefix).await
    }

    fn watch(&self, key: &str) -> Result<Subscription> {
        self.inner.watch(key)
    }

    async fn transaction(
        &self,
        keys: &[String],
        apply: &mut (dyn for<'a> FnMut(&'a [Option<Value>]) -> TxDecision + Send),
    ) -> Result<TxOutcome> {
        self.check(keys)?;
        self.inner.transaction(keys, apply).await
    }
}
