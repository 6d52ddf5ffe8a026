//! Party-side matchmaking client
//!
//! One `PartyHandle` per connecting party. Handles share a `Matchmaker` and
//! coordinate only through the store.

pub mod handle;

pub use handle::PartyHandle;
