//! Per-party client of the matchmaker
//!
//! A `PartyHandle` is what one connecting party holds: it joins and leaves
//! the waiting queue, and its subscription drives pairing from the client
//! side until the party's own entry shows a match.

use crate::error::{matchmaking_error, MatchmakingError, Result};
use crate::matchmaker::Matchmaker;
use crate::session::SessionWatch;
use crate::store::Value;
use crate::types::{PartyId, QueueEntry, Session, SessionId};
use crate::utils::Clock;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Running match driver; aborted when dropped
#[derive(Debug)]
struct MatchSubscription {
    task: JoinHandle<()>,
}

impl Drop for MatchSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Handle of one party taking part in matchmaking
pub struct PartyHandle {
    party_id: PartyId,
    matchmaker: Arc<Matchmaker>,
    clock: Arc<dyn Clock>,
    subscription: Option<MatchSubscription>,
}

impl PartyHandle {
    pub fn new(party_id: impl Into<PartyId>, matchmaker: Arc<Matchmaker>, clock: Arc<dyn Clock>) -> Self {
        Self {
            party_id: party_id.into(),
            matchmaker,
            clock,
            subscription: None,
        }
    }

    pub fn party_id(&self) -> &str {
        &self.party_id
    }

    /// Enter the waiting queue, then try to pair with whoever is waiting.
    ///
    /// Once the entry is stored the party is durably waiting, so a failing
    /// pairing attempt is logged and left to later triggers.
    pub async fn join(&self) -> Result<QueueEntry> {
        let entry = QueueEntry::waiting(self.party_id.clone(), self.clock.now());
        let metrics = self.matchmaker.metrics();

        if let Err(e) = self.matchmaker.queue().enqueue(&entry).await {
            let reason = match matchmaking_error(&e) {
                Some(MatchmakingError::AlreadyWaiting { .. }) => "already_waiting",
                Some(MatchmakingError::Connectivity { .. }) => "connectivity",
                _ => "error",
            };
            metrics.record_join_rejected(reason);
            return Err(e);
        }

        metrics.record_join();
        info!("Party {} joined the queue at {}", self.party_id, entry.joined_at);

        if let Err(e) = self.matchmaker.pair_until_settled(&self.party_id).await {
            warn!(
                "Pairing after join of {} failed, party stays queued: {}",
                self.party_id, e
            );
        }
        Ok(entry)
    }

    /// Leave the queue; only a waiting entry is removed
    pub async fn leave(&self) -> Result<bool> {
        let removed = self.matchmaker.queue().remove_if_waiting(&self.party_id).await?;
        if removed {
            self.matchmaker.metrics().record_leave();
            info!("Party {} left the queue", self.party_id);
        } else {
            debug!("Party {} had no waiting entry to remove", self.party_id);
        }
        Ok(removed)
    }

    /// Watch the party's own entry and call `on_matched` once it is matched.
    ///
    /// Returns as soon as the watch is registered. Replaces any previous
    /// subscription of this handle.
    pub fn subscribe<F>(&mut self, on_matched: F) -> Result<()>
    where
        F: FnOnce(SessionId) + Send + 'static,
    {
        let watch = self.matchmaker.queue().watch(&self.party_id)?;
        let task = tokio::spawn(drive_match(
            watch,
            self.matchmaker.clone(),
            self.clock.clone(),
            on_matched,
        ));

        self.subscription = Some(MatchSubscription { task });
        debug!("Party {} subscribed to its queue entry", self.party_id);
        Ok(())
    }

    /// Stop the match driver; returns whether one was running
    pub fn unsubscribe(&mut self) -> bool {
        match self.subscription.take() {
            Some(subscription) => !subscription.task.is_finished(),
            None => false,
        }
    }

    /// Whether the match driver is still waiting for a match
    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    /// Follow the session record once matched
    pub fn watch_session(&self, session_id: &str) -> Result<SessionWatch> {
        self.matchmaker.sessions().watch(session_id)
    }

    /// Write this party's state slot of a session
    pub async fn update_state(&self, session_id: &str, state: Value) -> Result<Session> {
        self.matchmaker
            .sessions()
            .update_member_state(session_id, &self.party_id, state)
            .await
    }

    /// End a session this party belongs to
    pub async fn end_session(&self, session_id: &str) -> Result<Session> {
        let sessions = self.matchmaker.sessions();
        let session = sessions.get(session_id).await?;
        if !session.has_member(&self.party_id) {
            return Err(MatchmakingError::NotSessionMember {
                session_id: session_id.to_string(),
                party_id: self.party_id.clone(),
            }
            .into());
        }
        if !session.is_active() {
            return Ok(session);
        }

        let outcome = sessions.end(session_id).await?;
        if outcome.transitioned {
            self.matchmaker.metrics().record_session_ended();
        }
        Ok(outcome.session)
    }
}

/// Client-side trigger loop of one subscription
async fn drive_match<F>(
    mut watch: crate::queue::EntryWatch,
    matchmaker: Arc<Matchmaker>,
    clock: Arc<dyn Clock>,
    on_matched: F,
) where
    F: FnOnce(SessionId) + Send + 'static,
{
    let party_id = watch.party_id().to_string();

    while let Some(update) = watch.next().await {
        let Some(entry) = update else {
            continue;
        };

        if entry.is_waiting() {
            if let Err(e) = matchmaker.pair_until_settled(&party_id).await {
                warn!("Pairing triggered by {} failed: {}", party_id, e);
            }
            continue;
        }

        let Some(session_id) = entry.session_id.clone() else {
            warn!("Matched entry of {} carries no session id", party_id);
            continue;
        };

        info!("Party {} matched into session {}", party_id, session_id);
        if let Ok(wait) = (clock.now() - entry.joined_at).to_std() {
            matchmaker.metrics().record_match_wait(wait);
        }
        on_matched(session_id.clone());

        // The entry is kept when the session cannot be made to exist, so the
        // opponent's driver can still rebuild it from its own copy.
        if let Err(e) = matchmaker.ensure_session(&entry).await {
            error!(
                "Session {} of {} could not be ensured: {}",
                session_id, party_id, e
            );
            return;
        }
        if let Err(e) = matchmaker.queue().acknowledge(&party_id, &session_id).await {
            warn!("Failed to acknowledge match of {}: {}", party_id, e);
        }
        return;
    }

    debug!("Queue watch of {} closed", party_id);
}
