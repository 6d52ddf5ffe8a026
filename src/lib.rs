//! Pairing Room - 1:1 matchmaking on a shared store
//!
//! Parties join a shared waiting queue; the matchmaker binds the two oldest
//! waiting entries into an exclusive session with one atomic store
//! transaction, so concurrent clients can never match a party twice.

pub mod config;
pub mod error;
pub mod matchmaker;
pub mod metrics;
pub mod party;
pub mod queue;
pub mod service;
pub mod session;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use matchmaker::{Matchmaker, PairingOutcome};
pub use party::PartyHandle;
pub use queue::WaitingQueue;
pub use session::SessionRegistry;
pub use store::{InMemoryStore, Store};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
