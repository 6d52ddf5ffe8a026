//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the pairing-room service using
//! Prometheus metrics.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome label of a pairing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingOutcomeLabel {
    Formed,
    NotEnoughCandidates,
    LostRace,
    Failed,
}

impl PairingOutcomeLabel {
    fn as_str(&self) -> &'static str {
        match self {
            PairingOutcomeLabel::Formed => "formed",
            PairingOutcomeLabel::NotEnoughCandidates => "not_enough_candidates",
            PairingOutcomeLabel::LostRace => "lost_race",
            PairingOutcomeLabel::Failed => "failed",
        }
    }
}

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Queue-related metrics
    queue_metrics: QueueMetrics,

    /// Pairing-related metrics
    pairing_metrics: PairingMetrics,

    /// Session-related metrics
    session_metrics: SessionMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,
}

/// Queue-related metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Successful joins
    pub joins_total: IntCounter,

    /// Rejected joins by reason
    pub joins_rejected_total: IntCounterVec,

    /// Waiting entries removed by leave
    pub leaves_total: IntCounter,

    /// Parties currently waiting
    pub parties_waiting: IntGauge,

    /// Time between joining and seeing the match
    pub match_wait_seconds: Histogram,
}

/// Pairing-related metrics
#[derive(Clone)]
pub struct PairingMetrics {
    /// Pairing attempts by outcome
    pub attempts_total: IntCounterVec,

    /// Duration of one pairing attempt
    pub attempt_duration_seconds: Histogram,

    /// Sessions rebuilt from a matched entry after creation failed
    pub sessions_repaired_total: IntCounter,
}

/// Session-related metrics
#[derive(Clone)]
pub struct SessionMetrics {
    /// Sessions created
    pub sessions_created_total: IntCounter,

    /// Sessions ended
    pub sessions_ended_total: IntCounter,

    /// Sessions currently active
    pub sessions_active: IntGauge,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let pairing_metrics = PairingMetrics::new(&registry)?;
        let session_metrics = SessionMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            pairing_metrics,
            session_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get queue metrics
    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    /// Get pairing metrics
    pub fn pairing(&self) -> &PairingMetrics {
        &self.pairing_metrics
    }

    /// Get session metrics
    pub fn session(&self) -> &SessionMetrics {
        &self.session_metrics
    }

    /// Record a successful join
    pub fn record_join(&self) {
        self.queue_metrics.joins_total.inc();
    }

    /// Record a refused join
    pub fn record_join_rejected(&self, reason: &str) {
        self.queue_metrics
            .joins_rejected_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Record a waiting entry removed by leave
    pub fn record_leave(&self) {
        self.queue_metrics.leaves_total.inc();
    }

    /// Record how long a party waited before seeing its match
    pub fn record_match_wait(&self, wait: Duration) {
        self.queue_metrics
            .match_wait_seconds
            .observe(wait.as_secs_f64());
    }

    /// Record one pairing attempt
    pub fn record_pairing_attempt(&self, outcome: PairingOutcomeLabel, duration: Duration) {
        self.pairing_metrics
            .attempts_total
            .with_label_values(&[outcome.as_str()])
            .inc();
        self.pairing_metrics
            .attempt_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Record a session rebuilt from a matched entry
    pub fn record_session_repaired(&self) {
        self.pairing_metrics.sessions_repaired_total.inc();
    }

    /// Record a session being created
    pub fn record_session_created(&self) {
        self.session_metrics.sessions_created_total.inc();
    }

    /// Record a session being ended
    pub fn record_session_ended(&self) {
        self.session_metrics.sessions_ended_total.inc();
    }

    /// Update the current-state gauges
    pub fn update_gauges(&self, parties_waiting: usize, sessions_active: usize) {
        self.queue_metrics
            .parties_waiting
            .set(parties_waiting as i64);
        self.session_metrics
            .sessions_active
            .set(sessions_active as i64);
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update uptime
    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }

    /// Count of attempts recorded with `outcome`
    pub fn pairing_attempts(&self, outcome: PairingOutcomeLabel) -> u64 {
        self.pairing_metrics
            .attempts_total
            .with_label_values(&[outcome.as_str()])
            .get()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("pairing_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "pairing_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let joins_total = IntCounter::new(
            "pairing_room_joins_total",
            "Total parties that entered the waiting queue",
        )?;
        registry.register(Box::new(joins_total.clone()))?;

        let joins_rejected_total = IntCounterVec::new(
            Opts::new(
                "pairing_room_joins_rejected_total",
                "Total join requests refused",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(joins_rejected_total.clone()))?;

        let leaves_total = IntCounter::new(
            "pairing_room_leaves_total",
            "Total waiting entries removed by leave",
        )?;
        registry.register(Box::new(leaves_total.clone()))?;

        let parties_waiting = IntGauge::new(
            "pairing_room_parties_waiting",
            "Parties currently waiting for a match",
        )?;
        registry.register(Box::new(parties_waiting.clone()))?;

        let match_wait_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "pairing_room_match_wait_seconds",
                "Time from joining the queue to seeing the match",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        )?;
        registry.register(Box::new(match_wait_seconds.clone()))?;

        Ok(Self {
            joins_total,
            joins_rejected_total,
            leaves_total,
            parties_waiting,
            match_wait_seconds,
        })
    }
}

impl PairingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let attempts_total = IntCounterVec::new(
            Opts::new(
                "pairing_room_pairing_attempts_total",
                "Pairing attempts by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(attempts_total.clone()))?;

        let attempt_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "pairing_room_pairing_attempt_duration_seconds",
                "Duration of one pairing attempt",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(attempt_duration_seconds.clone()))?;

        let sessions_repaired_total = IntCounter::new(
            "pairing_room_sessions_repaired_total",
            "Sessions rebuilt from a matched queue entry",
        )?;
        registry.register(Box::new(sessions_repaired_total.clone()))?;

        Ok(Self {
            attempts_total,
            attempt_duration_seconds,
            sessions_repaired_total,
        })
    }
}

impl SessionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let sessions_created_total =
            IntCounter::new("pairing_room_sessions_created_total", "Sessions created")?;
        registry.register(Box::new(sessions_created_total.clone()))?;

        let sessions_ended_total =
            IntCounter::new("pairing_room_sessions_ended_total", "Sessions ended")?;
        registry.register(Box::new(sessions_ended_total.clone()))?;

        let sessions_active =
            IntGauge::new("pairing_room_sessions_active", "Sessions currently active")?;
        registry.register(Box::new(sessions_active.clone()))?;

        Ok(Self {
            sessions_created_total,
            sessions_ended_total,
            sessions_active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().unwrap();
        assert!(!collector.registry().gather().is_empty());
    }

    #[test]
    fn test_pairing_attempt_recording() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_pairing_attempt(PairingOutcomeLabel::Formed, Duration::from_millis(1));
        collector.record_pairing_attempt(PairingOutcomeLabel::LostRace, Duration::from_millis(2));
        collector.record_pairing_attempt(PairingOutcomeLabel::LostRace, Duration::from_millis(2));

        assert_eq!(collector.pairing_attempts(PairingOutcomeLabel::Formed), 1);
        assert_eq!(collector.pairing_attempts(PairingOutcomeLabel::LostRace), 2);
        assert_eq!(
            collector.pairing_attempts(PairingOutcomeLabel::NotEnoughCandidates),
            0
        );
        assert_eq!(
            collector
                .pairing()
                .attempt_duration_seconds
                .get_sample_count(),
            3
        );
    }

    #[test]
    fn test_queue_and_session_counters() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_join();
        collector.record_join();
        collector.record_join_rejected("already_waiting");
        collector.record_leave();
        collector.record_session_created();
        collector.update_gauges(3, 1);

        assert_eq!(collector.queue().joins_total.get(), 2);
        assert_eq!(
            collector
                .queue()
                .joins_rejected_total
                .with_label_values(&["already_waiting"])
                .get(),
            1
        );
        assert_eq!(collector.queue().leaves_total.get(), 1);
        assert_eq!(collector.queue().parties_waiting.get(), 3);
        assert_eq!(collector.session().sessions_created_total.get(), 1);
        assert_eq!(collector.session().sessions_active.get(), 1);
    }

    #[test]
    fn test_health_status_updates() {
        let collector = MetricsCollector::new().unwrap();
        collector.update_health_status(2);
        assert_eq!(collector.service_metrics.health_status.get(), 2);
    }

    #[test]
    fn test_metrics_timer() {
        let collector = MetricsCollector::new().unwrap();
        let timer = collector.start_timer();
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.stop() >= Duration::from_millis(5));
    }
}
