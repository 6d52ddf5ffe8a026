//! Session storage under `sessions/{session_id}`
//!
//! Creation is idempotent for the same id and member pair, which is what lets
//! the matchmaker retry a creation with the id it fixed before committing the
//! queue transaction. Post-creation updates are single-key transactions so the
//! two members can write their state slots concurrently.

use crate::config::BackoffPolicy;
use crate::error::{MatchmakingError, Result};
use crate::store::{decode, encode, with_backoff, Store, Subscription, TxDecision, Value};
use crate::types::{PartyId, Session, SessionId, SessionStatus};
use crate::utils::Clock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key prefix of all session records
pub const SESSION_PREFIX: &str = "sessions/";

/// Store key of a session record
pub fn session_key(session_id: &str) -> String {
    format!("{}{}", SESSION_PREFIX, session_id)
}

fn read_session(value: &Option<Value>) -> Option<Session> {
    let value = value.as_ref()?;
    match decode::<Session>(value.clone()) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!("Ignoring undecodable session record: {}", e);
            None
        }
    }
}

/// Why a session update was refused inside the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refusal {
    Missing,
    Duplicate,
    NotMember,
    Ended,
}

impl Refusal {
    fn into_error(self, session_id: &str, party_id: &str) -> anyhow::Error {
        let session_id = session_id.to_string();
        match self {
            Refusal::Missing => MatchmakingError::SessionNotFound { session_id },
            Refusal::Duplicate => MatchmakingError::DuplicateSession { session_id },
            Refusal::NotMember => MatchmakingError::NotSessionMember {
                session_id,
                party_id: party_id.to_string(),
            },
            Refusal::Ended => MatchmakingError::SessionEnded { session_id },
        }
        .into()
    }
}

/// Result of [`SessionRegistry::end`]
#[derive(Debug, Clone, PartialEq)]
pub struct EndOutcome {
    pub session: Session,
    /// This call moved the session from active to ended
    pub transitioned: bool,
}

/// Registry of formed sessions
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    retry: BackoffPolicy,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, retry: BackoffPolicy) -> Self {
        Self {
            store,
            clock,
            retry,
        }
    }

    /// Create the session, or return the existing one if it already holds the same pair
    pub async fn create(&self, session_id: &str, members: [PartyId; 2]) -> Result<Session> {
        let fresh = Session::new(session_id, members.clone(), self.clock.now())?;
        let keys = &[session_key(session_id)];
        let proposed = &encode(&fresh)?;
        let members = &members;
        let store = &self.store;

        let (existing, refusal) = with_backoff(&self.retry, "create session", move || async move {
            let mut existing: Option<Session> = None;
            let mut refusal: Option<Refusal> = None;
            store
                .transaction(keys, &mut |current: &[Option<Value>]| {
                    existing = None;
                    refusal = None;
                    match (current[0].is_some(), read_session(&current[0])) {
                        (_, Some(session)) if session.same_members(members) => {
                            existing = Some(session);
                            TxDecision::Abort
                        }
                        (true, _) => {
                            refusal = Some(Refusal::Duplicate);
                            TxDecision::Abort
                        }
                        (false, _) => TxDecision::Commit(vec![Some(proposed.clone())]),
                    }
                })
                .await?;
            Ok::<_, anyhow::Error>((existing, refusal))
        })
        .await?;

        if let Some(refusal) = refusal {
            return Err(refusal.into_error(session_id, ""));
        }
        match existing {
            Some(session) => {
                debug!("Session {} already exists with the same members", session_id);
                Ok(session)
            }
            None => {
                info!(
                    "Created session {} for {} and {}",
                    session_id, members[0], members[1]
                );
                Ok(fresh)
            }
        }
    }

    /// Fetch a session, `SessionNotFound` when absent
    pub async fn get(&self, session_id: &str) -> Result<Session> {
        self.find(session_id)
            .await?
            .ok_or_else(|| Refusal::Missing.into_error(session_id, ""))
    }

    /// Fetch a session if it exists
    pub async fn find(&self, session_id: &str) -> Result<Option<Session>> {
        let key = &session_key(session_id);
        let store = &self.store;
        let value = with_backoff(&self.retry, "read session", move || async move {
            store.get(key).await
        })
        .await?;
        Ok(read_session(&value))
    }

    /// Mark the session ended; ending an ended session is a no-op.
    ///
    /// `transitioned` is decided inside the transaction, so of two racing
    /// callers exactly one sees `true`.
    pub async fn end(&self, session_id: &str) -> Result<EndOutcome> {
        let ended_at = self.clock.now();
        let (session, transitioned) = self
            .modify(session_id, "", "end session", move |session| {
                if session.is_active() {
                    session.status = SessionStatus::Ended;
                    session.ended_at = Some(ended_at);
                }
                Ok(())
            })
            .await?;

        if transitioned {
            info!("Session {} ended", session_id);
        } else {
            debug!("Session {} was already ended", session_id);
        }
        Ok(EndOutcome {
            session,
            transitioned,
        })
    }

    /// Replace one member's state slot
    pub async fn update_member_state(
        &self,
        session_id: &str,
        party_id: &str,
        state: Value,
    ) -> Result<Session> {
        let state = &state;
        let (session, _) = self
            .modify(session_id, party_id, "update member state", move |session| {
                if !session.is_active() {
                    return Err(Refusal::Ended);
                }
                let member = session
                    .members
                    .iter_mut()
                    .find(|m| m.party_id == party_id)
                    .ok_or(Refusal::NotMember)?;
                member.state = state.clone();
                Ok(())
            })
            .await?;
        Ok(session)
    }

    /// Every session that has not ended
    pub async fn list_active(&self) -> Result<Vec<Session>> {
        let store = &self.store;
        let raw = with_backoff(&self.retry, "scan sessions", move || async move {
            store.scan(SESSION_PREFIX).await
        })
        .await?;

        Ok(raw
            .into_iter()
            .filter_map(|(_, value)| read_session(&Some(value)))
            .filter(Session::is_active)
            .collect())
    }

    /// Watch a session record
    pub fn watch(&self, session_id: &str) -> Result<SessionWatch> {
        let subscription = self.store.watch(&session_key(session_id))?;
        Ok(SessionWatch {
            session_id: session_id.to_string(),
            subscription,
        })
    }

    /// Read-modify-write of one session record inside a transaction.
    ///
    /// Returns the resulting record and whether `change` altered it; an
    /// unaltered record is not written.
    async fn modify<F>(
        &self,
        session_id: &str,
        party_id: &str,
        operation: &str,
        change: F,
    ) -> Result<(Session, bool)>
    where
        F: Fn(&mut Session) -> std::result::Result<(), Refusal> + Send + Sync,
    {
        let keys = &[session_key(session_id)];
        let store = &self.store;
        let change = &change;

        let (updated, refusal) = with_backoff(&self.retry, operation, move || async move {
            let mut updated: Option<(Session, bool)> = None;
            let mut refusal: Option<Refusal> = None;
            store
                .transaction(keys, &mut |current: &[Option<Value>]| {
                    updated = None;
                    refusal = None;
                    let Some(before) = read_session(&current[0]) else {
                        refusal = Some(Refusal::Missing);
                        return TxDecision::Abort;
                    };
                    let mut session = before.clone();
                    if let Err(why) = change(&mut session) {
                        refusal = Some(why);
                        return TxDecision::Abort;
                    }
                    if session == before {
                        updated = Some((session, false));
                        return TxDecision::Abort;
                    }
                    match encode(&session) {
                        Ok(value) => {
                            updated = Some((session, true));
                            TxDecision::Commit(vec![Some(value)])
                        }
                        Err(_) => TxDecision::Abort,
                    }
                })
                .await?;
            Ok::<_, anyhow::Error>((updated, refusal))
        })
        .await?;

        if let Some(refusal) = refusal {
            return Err(refusal.into_error(session_id, party_id));
        }
        updated.ok_or_else(|| {
            MatchmakingError::Serialization {
                message: format!("Failed to encode session {}", session_id),
            }
            .into()
        })
    }
}

/// Typed change feed of one session record
#[derive(Debug)]
pub struct SessionWatch {
    session_id: SessionId,
    subscription: Subscription,
}

impl SessionWatch {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next state of the record (`Some(None)` while absent), `None` once the feed is closed
    pub async fn next(&mut self) -> Option<Option<Session>> {
        let value = self.subscription.recv().await?;
        Some(read_session(&value))
    }
}
