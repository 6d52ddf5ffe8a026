//! Test fixtures and store wrappers for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use pairing_room::config::BackoffPolicy;
use pairing_room::error::{MatchmakingError, Result};
use pairing_room::matchmaker::{matchmaker_for_store, Matchmaker};
use pairing_room::metrics::MetricsCollector;
use pairing_room::party::PartyHandle;
use pairing_room::store::{InMemoryStore, Store, Subscription, TxDecision, TxOutcome, Value};
use pairing_room::types::{QueueEntry, SessionId};
use pairing_room::utils::{ManualClock, SequentialSessionIds};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Store wrapper whose next `n` round trips fail as unreachable
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    failures_left: AtomicU32,
    failures_seen: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` operations
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn failures_seen(&self) -> u64 {
        self.failures_seen.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        let took_failure = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if took_failure {
            self.failures_seen.fetch_add(1, Ordering::SeqCst);
            return Err(MatchmakingError::StoreUnavailable {
                message: "injected outage".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.remove(key).await
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        self.check()?;
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
        self.check()?;
        self.inner.transaction(keys, apply).await
    }
}

/// Store wrapper that yields to the scheduler before every round trip, so
/// concurrently polled futures interleave between their reads and writes
#[derive(Debug, Default)]
pub struct YieldingStore {
    inner: InMemoryStore,
}

impl YieldingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for YieldingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        tokio::task::yield_now().await;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        tokio::task::yield_now().await;
        self.inner.remove(key).await
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        tokio::task::yield_now().await;
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
        tokio::task::yield_now().await;
        self.inner.transaction(keys, apply).await
    }
}

/// Backoff with millisecond delays, for tests
pub fn fast_retry(max_retries: u32) -> BackoffPolicy {
    BackoffPolicy {
        max_retries,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

/// A complete matchmaking system on a logical clock with ids `s1`, `s2`, ...
pub struct TestSystem {
    pub clock: Arc<ManualClock>,
    pub matchmaker: Arc<Matchmaker>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryStore::default()), fast_retry(3))
    }

    pub fn with_store(store: Arc<dyn Store>, retry: BackoffPolicy) -> Self {
        let clock = Arc::new(ManualClock::new(0));
        let metrics = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
        let matchmaker = matchmaker_for_store(store, clock.clone(), retry, metrics)
            .with_session_ids(Arc::new(SequentialSessionIds::new("s")));

        Self {
            clock,
            matchmaker: Arc::new(matchmaker),
        }
    }

    pub fn party(&self, party_id: &str) -> PartyHandle {
        PartyHandle::new(party_id, self.matchmaker.clone(), self.clock.clone())
    }

    /// Put a waiting entry straight into the queue, without join-time pairing
    pub async fn enqueue_at(&self, party_id: &str, millis: i64) -> QueueEntry {
        let joined_at = chrono::DateTime::from_timestamp_millis(millis).expect("valid timestamp");
        let entry = QueueEntry::waiting(party_id, joined_at);
        self.matchmaker
            .queue()
            .enqueue(&entry)
            .await
            .expect("Failed to enqueue");
        entry
    }
}

impl Default for TestSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscribe `party` and return the channel its match notification lands on
pub fn subscribe(party: &mut PartyHandle) -> mpsc::UnboundedReceiver<SessionId> {
    let (tx, rx) = mpsc::unbounded_channel();
    party
        .subscribe(move |session_id| {
            let _ = tx.send(session_id);
        })
        .expect("Failed to subscribe");
    rx
}

/// Wait for a match notification
pub async fn expect_match(rx: &mut mpsc::UnboundedReceiver<SessionId>) -> SessionId {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for a match")
        .expect("Subscription dropped without a match")
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
