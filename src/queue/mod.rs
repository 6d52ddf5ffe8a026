//! The shared waiting queue
//!
//! Queue entries live in the shared store, one key per party. This module
//! owns the key layout and every transactional mutation of an entry.

pub mod waiting_queue;

pub use waiting_queue::{entry_key, BindOutcome, EntryWatch, WaitingQueue, QUEUE_PREFIX};
