//! Error types for the matchmaking service
//!
//! Domain failures are `MatchmakingError` values carried inside `anyhow::Error`,
//! callers that need to branch on them use [`matchmaking_error`].

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Party is already waiting in the queue: {party_id}")]
    AlreadyWaiting { party_id: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Session {session_id} already exists with different members")]
    DuplicateSession { session_id: String },

    #[error("Party {party_id} is not a member of session {session_id}")]
    NotSessionMember {
        session_id: String,
        party_id: String,
    },

    #[error("Session has ended: {session_id}")]
    SessionEnded { session_id: String },

    #[error("Invalid session members: {reason}")]
    InvalidMembers { reason: String },

    #[error("Store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Store unreachable during {operation} after {attempts} attempts: {message}")]
    Connectivity {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error("Transaction on [{keys}] still conflicting after {retries} retries")]
    TransactionContention { keys: String, retries: usize },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Whether the failure is a transient store outage worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, MatchmakingError::StoreUnavailable { .. })
    }
}

/// Look inside an `anyhow::Error` for a `MatchmakingError`
pub fn matchmaking_error(err: &anyhow::Error) -> Option<&MatchmakingError> {
    err.downcast_ref::<MatchmakingError>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = MatchmakingError::AlreadyWaiting {
            party_id: "alice".to_string(),
        }
        .into();

        assert!(matches!(
            matchmaking_error(&err),
            Some(MatchmakingError::AlreadyWaiting { party_id }) if party_id == "alice"
        ));
        assert_eq!(
            err.to_string(),
            "Party is already waiting in the queue: alice"
        );
    }

    #[test]
    fn test_only_store_outages_are_transient() {
        assert!(MatchmakingError::StoreUnavailable {
            message: "down".to_string()
        }
        .is_transient());
        assert!(!MatchmakingError::SessionNotFound {
            session_id: "s1".to_string()
        }
        .is_transient());
        assert!(!MatchmakingError::Connectivity {
            operation: "join".to_string(),
            attempts: 3,
            message: "down".to_string()
        }
        .is_transient());
    }
}
