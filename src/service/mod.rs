//! Service layer for the pairing-room matchmaking service
//!
//! This module contains the main application state, health checks, the HTTP
//! surface and background task management for the running service.

pub mod app;
pub mod health;
pub mod http;

pub use app::{AppState, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus, ServiceStats};
pub use http::{create_router, serve};
