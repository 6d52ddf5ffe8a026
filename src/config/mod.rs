//! Configuration management for the pairing-room service
//!
//! This module handles configuration loading from environment variables or a
//! TOML file, validation, and default values.

pub mod app;
pub mod retry;

// Re-export commonly used types
pub use app::{validate_config, AppConfig, MatchmakingSettings, ServiceSettings, StoreSettings};
pub use retry::BackoffPolicy;
