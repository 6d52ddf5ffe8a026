//! Pairing engine
//!
//! Turns the waiting queue into sessions, two oldest parties at a time, with
//! every binding decided by one store transaction.

pub mod pairing;
pub mod policy;

pub use pairing::{matchmaker_for_store, Matchmaker, PairingOutcome};
pub use policy::{arrival_order, OldestFirstPolicy, PairingPolicy};
