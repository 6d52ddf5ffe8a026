//! Main application state and service coordination
//!
//! This module contains the AppState that wires the shared store, the waiting
//! queue, the session registry and the matchmaker together, and owns the
//! background tasks of the running service.

use crate::config::AppConfig;
use crate::error::Result as MatchmakingResult;
use crate::matchmaker::Matchmaker;
use crate::metrics::MetricsCollector;
use crate::party::PartyHandle;
use crate::queue::WaitingQueue;
use crate::service::health::{HealthCheck, HealthStatus, ServiceStats};
use crate::session::SessionRegistry;
use crate::store::{InMemoryStore, Store};
use crate::types::Session;
use crate::utils::{Clock, SequentialSessionIds, SystemClock, UuidSessionIds};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Interval of the gauge and uptime refresh task
const METRICS_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Shared store holding the queue and the sessions
    store: Arc<dyn Store>,

    /// Source of join and session timestamps
    clock: Arc<dyn Clock>,

    /// Pairing engine shared by every party handle
    matchmaker: Arc<Matchmaker>,

    /// Prometheus metrics
    metrics: Arc<MetricsCollector>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,

    start_time: Instant,
}

impl AppState {
    /// Initialize the application with an in-process store and the system clock
    pub fn new(config: AppConfig) -> Result<Self, ServiceError> {
        let store = Arc::new(InMemoryStore::new(config.store.max_transaction_retries));
        Self::with_store(config, store, Arc::new(SystemClock))
    }

    /// Initialize the application on top of an existing store
    pub fn with_store(
        config: AppConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        info!("Initializing {} matchmaking service", config.service.name);

        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        let retry = config.store.retry;
        let queue = WaitingQueue::new(store.clone(), retry);
        let sessions = SessionRegistry::new(store.clone(), clock.clone(), retry);

        let mut matchmaker = Matchmaker::new(queue, sessions, metrics.clone())
            .with_max_pairing_rounds(config.matchmaking.max_pairing_rounds);
        let prefix = &config.matchmaking.session_id_prefix;
        matchmaker = if prefix.is_empty() {
            matchmaker.with_session_ids(Arc::new(UuidSessionIds))
        } else {
            info!("Using sequential session ids with prefix '{}'", prefix);
            matchmaker.with_session_ids(Arc::new(SequentialSessionIds::new(prefix.clone())))
        };

        Ok(Self {
            config,
            store,
            clock,
            matchmaker: Arc::new(matchmaker),
            metrics,
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            start_time: Instant::now(),
        })
    }

    /// Start the background tasks
    pub async fn start(&self) -> Result<(), ServiceError> {
        info!("Starting {} matchmaking service", self.config.service.name);

        *self.is_running.write().await = true;

        let mut tasks = self.background_tasks.lock().await;
        tasks.push(self.spawn_metrics_task());
        if let Some(interval) = self.config.sweep_interval() {
            tasks.push(self.spawn_sweep_task(interval));
        } else {
            info!("Background pairing sweep disabled");
        }

        info!("{} background tasks started", tasks.len());
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        *self.is_running.write().await = false;
        self.stop_background_tasks().await;

        let final_stats = self
            .stats()
            .await
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to get final stats: {}", e),
            })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("{} shutdown completed", self.config.service.name);
        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn matchmaker(&self) -> Arc<Matchmaker> {
        self.matchmaker.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// A fresh handle for one party
    pub fn party(&self, party_id: &str) -> PartyHandle {
        PartyHandle::new(party_id, self.matchmaker.clone(), self.clock.clone())
    }

    /// End a session on behalf of the service
    pub async fn end_session(&self, session_id: &str) -> MatchmakingResult<Session> {
        let outcome = self.matchmaker.sessions().end(session_id).await?;
        if outcome.transitioned {
            self.metrics.record_session_ended();
        }
        Ok(outcome.session)
    }

    /// Current queue and session counts
    pub async fn stats(&self) -> MatchmakingResult<ServiceStats> {
        let waiting = self.matchmaker.queue().waiting_entries().await?.len();
        let active = self.matchmaker.sessions().list_active().await?.len();
        self.metrics.update_gauges(waiting, active);

        Ok(ServiceStats {
            parties_waiting: waiting,
            sessions_active: active,
            sessions_created: self.metrics.session().sessions_created_total.get(),
            sessions_ended: self.metrics.session().sessions_ended_total.get(),
            uptime_seconds: self.uptime().as_secs(),
        })
    }

    /// Refresh gauges, uptime and health status
    fn spawn_metrics_task(&self) -> JoinHandle<()> {
        let matchmaker = self.matchmaker.clone();
        let metrics = self.metrics.clone();
        let is_running = self.is_running.clone();
        let start_time = self.start_time;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(METRICS_REFRESH_INTERVAL);
            info!("Metrics update task started");

            while *is_running.read().await {
                interval.tick().await;

                let waiting = matchmaker.queue().waiting_entries().await;
                let active = matchmaker.sessions().list_active().await;
                let status = match (waiting, active) {
                    (Ok(waiting), Ok(active)) => {
                        debug!(
                            "Updating metrics - waiting: {}, active sessions: {}",
                            waiting.len(),
                            active.len()
                        );
                        metrics.update_gauges(waiting.len(), active.len());
                        HealthStatus::Healthy
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        warn!("Failed to read store for metrics update: {}", e);
                        HealthStatus::Unhealthy
                    }
                };
                metrics.update_health_status(status.as_metric());
                metrics.update_uptime(start_time.elapsed());
            }

            info!("Metrics update task stopped");
        })
    }

    /// Periodic pairing pass, a safety net for parties nobody triggers for
    fn spawn_sweep_task(&self, period: Duration) -> JoinHandle<()> {
        let matchmaker = self.matchmaker.clone();
        let is_running = self.is_running.clone();
        info!("Starting pairing sweep ({}ms interval)", period.as_millis());

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            while *is_running.read().await {
                interval.tick().await;

                match matchmaker.pair_until_settled("sweep").await {
                    Ok(formed) if !formed.is_empty() => {
                        info!("Sweep formed {} sessions", formed.len());
                    }
                    Ok(_) => debug!("Sweep found nothing to pair"),
                    Err(e) => warn!("Pairing sweep failed: {}", e),
                }

                match matchmaker.repair_stranded_sessions().await {
                    Ok(0) => {}
                    Ok(repaired) => info!("Sweep rebuilt {} stranded sessions", repaired),
                    Err(e) => warn!("Stranded session repair failed: {}", e),
                }
            }

            info!("Pairing sweep stopped");
        })
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock().await;
        let task_count = tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for (i, task) in tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }
        info!("All {} background tasks stopped", task_count);
    }

    /// Full health report
    pub async fn health(&self) -> HealthCheck {
        HealthCheck::check(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffPolicy;
    use crate::store::outage::PrefixOutageStore;
    use crate::utils::ManualClock;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.matchmaking.session_id_prefix = "s".to_string();
        config.matchmaking.sweep_interval_ms = 10;
        config
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.matchmaking.max_pairing_rounds = 0;
        assert!(matches!(
            AppState::new(config),
            Err(ServiceError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_parties_pair_through_app_state() {
        let app = AppState::with_store(
            test_config(),
            Arc::new(InMemoryStore::default()),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();

        app.party("alice").join().await.unwrap();
        app.party("bob").join().await.unwrap();

        let stats = app.stats().await.unwrap();
        assert_eq!(stats.parties_waiting, 0);
        assert_eq!(stats.sessions_active, 1);
        assert_eq!(stats.sessions_created, 1);

        let ended = app.end_session("s1").await.unwrap();
        assert!(!ended.is_active());
        app.end_session("s1").await.unwrap();
        assert_eq!(app.stats().await.unwrap().sessions_ended, 1);
    }

    #[tokio::test]
    async fn test_sweep_pairs_parties_nobody_triggered() {
        let app = AppState::with_store(
            test_config(),
            Arc::new(InMemoryStore::default()),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();

        // Written straight to the queue, so no join-time pairing runs
        let queue = app.matchmaker().queue().clone();
        for party in ["alice", "bob"] {
            queue
                .enqueue(&crate::types::QueueEntry::waiting(
                    party,
                    chrono::DateTime::from_timestamp_millis(0).unwrap(),
                ))
                .await
                .unwrap();
        }

        app.start().await.unwrap();
        assert!(app.is_running().await);

        let mut formed = false;
        for _ in 0..100 {
            if app.matchmaker().sessions().find("s1").await.unwrap().is_some() {
                formed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(formed);

        app.shutdown().await.unwrap();
        assert!(!app.is_running().await);
    }

    #[tokio::test]
    async fn test_sweep_rebuilds_session_lost_during_join() {
        let mut config = test_config();
        config.store.retry = BackoffPolicy {
            max_retries: 1,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        let store = Arc::new(PrefixOutageStore::new(crate::session::SESSION_PREFIX));
        let app =
            AppState::with_store(config, store.clone(), Arc::new(ManualClock::new(0))).unwrap();

        // The bind commits but the session record cannot be written
        store.set_offline(true);
        app.party("alice").join().await.unwrap();
        app.party("bob").join().await.unwrap();

        let queue = app.matchmaker().queue().clone();
        let bob = queue.entry("bob").await.unwrap().unwrap();
        assert!(bob.is_matched_into("s1"));
        store.set_offline(false);
        assert!(app.matchmaker().sessions().find("s1").await.unwrap().is_none());

        app.start().await.unwrap();

        let mut rebuilt = None;
        for _ in 0..100 {
            rebuilt = app.matchmaker().sessions().find("s1").await.unwrap();
            if rebuilt.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let session = rebuilt.expect("sweep did not rebuild s1");
        assert!(session.has_member("alice"));
        assert!(session.has_member("bob"));
        assert_eq!(app.metrics().pairing().sessions_repaired_total.get(), 1);

        app.shutdown().await.unwrap();
    }
}
