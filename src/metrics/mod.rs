//! Metrics for the pairing-room service
//!
//! Prometheus counters and gauges for queue, pairing and session activity.
//! The HTTP exposition lives in `service::http`.

pub mod collector;

pub use collector::{
    MetricsCollector, MetricsTimer, PairingMetrics, PairingOutcomeLabel, QueueMetrics,
    ServiceMetrics, SessionMetrics,
};
