//! Common types used throughout the matchmaking service

use crate::error::{MatchmakingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-supplied identifier of a party waiting for a match
pub type PartyId = String;

/// Unique identifier for sessions
pub type SessionId = String;

/// Lifecycle of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Waiting,
    Matched,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueStatus::Waiting => write!(f, "waiting"),
            QueueStatus::Matched => write!(f, "matched"),
        }
    }
}

/// One waiting or recently matched party
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub party_id: PartyId,
    pub joined_at: DateTime<Utc>,
    pub status: QueueStatus,
    /// Present iff `status` is `Matched`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// The other member of the session, present iff `status` is `Matched`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opponent_id: Option<PartyId>,
    /// Fresh for every join call, lets a retried join recognize its own entry
    pub join_token: Uuid,
}

impl QueueEntry {
    /// Create a new waiting entry
    pub fn waiting(party_id: impl Into<PartyId>, joined_at: DateTime<Utc>) -> Self {
        Self {
            party_id: party_id.into(),
            joined_at,
            status: QueueStatus::Waiting,
            session_id: None,
            opponent_id: None,
            join_token: Uuid::new_v4(),
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.status == QueueStatus::Waiting
    }

    /// Whether this entry was bound into `session_id`
    pub fn is_matched_into(&self, session_id: &str) -> bool {
        self.status == QueueStatus::Matched && self.session_id.as_deref() == Some(session_id)
    }

    /// Copy of this entry bound into a session with `opponent_id`
    pub fn matched(&self, session_id: &str, opponent_id: &str) -> Self {
        Self {
            status: QueueStatus::Matched,
            session_id: Some(session_id.to_string()),
            opponent_id: Some(opponent_id.to_string()),
            ..self.clone()
        }
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Ended => write!(f, "ended"),
        }
    }
}

/// A party bound into a session, with a state slot owned by the game layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMember {
    pub party_id: PartyId,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub state: serde_json::Value,
}

/// An exclusive pairing of exactly two parties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub members: Vec<SessionMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a new active session for two distinct parties
    pub fn new(
        session_id: impl Into<SessionId>,
        members: [PartyId; 2],
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        if members[0] == members[1] {
            return Err(MatchmakingError::InvalidMembers {
                reason: format!("party {} cannot be paired with itself", members[0]),
            }
            .into());
        }
        if members.iter().any(|id| id.is_empty()) {
            return Err(MatchmakingError::InvalidMembers {
                reason: "party id cannot be empty".to_string(),
            }
            .into());
        }

        Ok(Self {
            session_id: session_id.into(),
            created_at,
            status: SessionStatus::Active,
            members: members
                .into_iter()
                .map(|party_id| SessionMember {
                    party_id,
                    joined_at: created_at,
                    state: serde_json::Value::Null,
                })
                .collect(),
            ended_at: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn has_member(&self, party_id: &str) -> bool {
        self.members.iter().any(|m| m.party_id == party_id)
    }

    pub fn member(&self, party_id: &str) -> Option<&SessionMember> {
        self.members.iter().find(|m| m.party_id == party_id)
    }

    pub fn member_ids(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.party_id.as_str()).collect()
    }

    /// Compare the member pair ignoring order
    pub fn same_members(&self, members: &[PartyId; 2]) -> bool {
        self.members.len() == 2
            && members.iter().all(|id| self.has_member(id))
            && members[0] != members[1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::current_timestamp;

    #[test]
    fn test_entry_serializes_lowercase_status_without_session() {
        let entry = QueueEntry::waiting("alice", current_timestamp());
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["status"], "waiting");
        assert!(json.get("session_id").is_none());
        assert!(json.get("opponent_id").is_none());
    }

    #[test]
    fn test_matched_entry_keeps_identity() {
        let entry = QueueEntry::waiting("alice", current_timestamp());
        let matched = entry.matched("s1", "bob");

        assert_eq!(matched.party_id, "alice");
        assert_eq!(matched.joined_at, entry.joined_at);
        assert_eq!(matched.join_token, entry.join_token);
        assert!(matched.is_matched_into("s1"));
        assert!(!matched.is_matched_into("s2"));
        assert_eq!(matched.opponent_id.as_deref(), Some("bob"));
    }

    #[test]
    fn test_session_requires_distinct_members() {
        let now = current_timestamp();
        assert!(Session::new("s1", ["alice".into(), "alice".into()], now).is_err());
        assert!(Session::new("s1", ["alice".into(), "".into()], now).is_err());

        let session = Session::new("s1", ["alice".into(), "bob".into()], now).unwrap();
        assert!(session.is_active());
        assert_eq!(session.member_ids(), vec!["alice", "bob"]);
        assert!(session.same_members(&["bob".into(), "alice".into()]));
        assert!(!session.same_members(&["alice".into(), "carol".into()]));
        assert_eq!(session.member("bob").unwrap().state, serde_json::Value::Null);
    }
}
