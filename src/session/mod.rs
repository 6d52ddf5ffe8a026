//! Session registry
//!
//! Stores the record of every formed pair. Sessions are created by the
//! matchmaker after a pairing commit and ended by either member.

pub mod registry;

pub use registry::{session_key, EndOutcome, SessionRegistry, SessionWatch, SESSION_PREFIX};
