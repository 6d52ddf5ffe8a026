//! The attempt-pair algorithm
//!
//! Any number of callers may run [`Matchmaker::attempt_pair`] concurrently.
//! Each reads a snapshot of waiting entries, picks the two oldest, fixes a
//! session id and tries to bind both entries in one store transaction. Only
//! one binding of a given entry can commit; losers see a stale snapshot and
//! end quietly.

use crate::config::BackoffPolicy;
use crate::error::{matchmaking_error, MatchmakingError, Result};
use crate::matchmaker::policy::{OldestFirstPolicy, PairingPolicy};
use crate::metrics::{MetricsCollector, PairingOutcomeLabel};
use crate::queue::{BindOutcome, WaitingQueue};
use crate::session::SessionRegistry;
use crate::types::{QueueEntry, Session};
use crate::utils::{SessionIdSource, UuidSessionIds};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of one pairing attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PairingOutcome {
    /// This attempt bound two entries and created their session
    Formed(Session),
    /// Fewer than two parties are waiting
    NotEnoughCandidates,
    /// The snapshot went stale before the binding committed
    LostRace,
}

impl PairingOutcome {
    fn label(&self) -> PairingOutcomeLabel {
        match self {
            PairingOutcome::Formed(_) => PairingOutcomeLabel::Formed,
            PairingOutcome::NotEnoughCandidates => PairingOutcomeLabel::NotEnoughCandidates,
            PairingOutcome::LostRace => PairingOutcomeLabel::LostRace,
        }
    }
}

/// The pairing engine shared by every party handle of one store
pub struct Matchmaker {
    queue: WaitingQueue,
    sessions: SessionRegistry,
    policy: Arc<dyn PairingPolicy>,
    session_ids: Arc<dyn SessionIdSource>,
    metrics: Arc<MetricsCollector>,
    max_pairing_rounds: usize,
}

impl Matchmaker {
    /// Create a matchmaker with oldest-first pairing and UUID session ids
    pub fn new(
        queue: WaitingQueue,
        sessions: SessionRegistry,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            queue,
            sessions,
            policy: Arc::new(OldestFirstPolicy::new()),
            session_ids: Arc::new(UuidSessionIds),
            metrics,
            max_pairing_rounds: 64,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn PairingPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_session_ids(mut self, session_ids: Arc<dyn SessionIdSource>) -> Self {
        self.session_ids = session_ids;
        self
    }

    pub fn with_max_pairing_rounds(mut self, rounds: usize) -> Self {
        self.max_pairing_rounds = rounds.max(1);
        self
    }

    pub fn queue(&self) -> &WaitingQueue {
        &self.queue
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Try to form exactly one session from the current waiting entries.
    ///
    /// `trigger` is the party whose join or watch caused the attempt; it only
    /// shows up in logs, the candidate set is every waiting entry.
    pub async fn attempt_pair(&self, trigger: &str) -> Result<PairingOutcome> {
        let timer = self.metrics.start_timer();
        let result = self.try_pair(trigger).await;

        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => PairingOutcomeLabel::Failed,
        };
        self.metrics.record_pairing_attempt(label, timer.stop());
        result
    }

    async fn try_pair(&self, trigger: &str) -> Result<PairingOutcome> {
        let snapshot = self.queue.waiting_entries().await?;
        let Some((first, second)) = self.policy.select_pair(&snapshot) else {
            debug!(
                "Pairing attempt by {}: {} waiting, nothing to pair",
                trigger,
                snapshot.len()
            );
            return Ok(PairingOutcome::NotEnoughCandidates);
        };

        // Fixed before the commit so a retried session creation reuses it
        let session_id = self.session_ids.next_session_id();
        debug!(
            "Pairing attempt by {}: binding {} and {} into {}",
            trigger, first.party_id, second.party_id, session_id
        );

        match self
            .queue
            .bind_pair(&first.party_id, &second.party_id, &session_id)
            .await
        {
            Ok(BindOutcome::Bound) => {}
            Ok(BindOutcome::Stale) => {
                debug!(
                    "Pairing attempt by {} lost the race for {} / {}",
                    trigger, first.party_id, second.party_id
                );
                return Ok(PairingOutcome::LostRace);
            }
            Err(e)
                if matches!(
                    matchmaking_error(&e),
                    Some(MatchmakingError::TransactionContention { .. })
                ) =>
            {
                debug!("Pairing attempt by {} gave up under contention: {}", trigger, e);
                return Ok(PairingOutcome::LostRace);
            }
            Err(e) => return Err(e),
        }

        let members = [first.party_id.clone(), second.party_id.clone()];
        let session = match self.sessions.create(&session_id, members).await {
            Ok(session) => session,
            Err(e) => {
                error!(
                    "Parties {} and {} are matched into {} but the session could not be created: {}",
                    first.party_id, second.party_id, session_id, e
                );
                return Err(e);
            }
        };
        self.metrics.record_session_created();

        info!(
            "Paired {} and {} into session {} (triggered by {})",
            first.party_id, second.party_id, session_id, trigger
        );
        Ok(PairingOutcome::Formed(session))
    }

    /// Keep pairing until fewer than two parties wait or the round budget runs out.
    ///
    /// A lost race means somebody else changed the queue, so the snapshot is
    /// re-read instead of giving up; this way a party whose own entry never
    /// changes still gets paired. Returns the sessions formed by this caller.
    pub async fn pair_until_settled(&self, trigger: &str) -> Result<Vec<Session>> {
        let mut formed = Vec::new();

        for _ in 0..self.max_pairing_rounds {
            match self.attempt_pair(trigger).await? {
                PairingOutcome::Formed(session) => formed.push(session),
                PairingOutcome::LostRace => continue,
                PairingOutcome::NotEnoughCandidates => return Ok(formed),
            }
        }

        debug!(
            "Pairing by {} stopped after {} rounds",
            trigger, self.max_pairing_rounds
        );
        Ok(formed)
    }

    /// Make sure the session a matched entry points at exists.
    ///
    /// Rebuilds the record with the already-fixed id when creation failed after
    /// the queue commit.
    pub async fn ensure_session(&self, entry: &QueueEntry) -> Result<Session> {
        let (Some(session_id), Some(opponent_id)) = (&entry.session_id, &entry.opponent_id) else {
            return Err(MatchmakingError::InternalError {
                message: format!("Entry of {} is not matched", entry.party_id),
            }
            .into());
        };

        if let Some(session) = self.sessions.find(session_id).await? {
            return Ok(session);
        }

        warn!(
            "Session {} missing for matched party {}, recreating it",
            session_id, entry.party_id
        );
        let session = self
            .sessions
            .create(session_id, [entry.party_id.clone(), opponent_id.clone()])
            .await?;
        self.metrics.record_session_repaired();
        Ok(session)
    }

    /// Recreate the session of every matched entry whose record is missing.
    ///
    /// Covers matches whose members never ran their own repair, e.g. because
    /// their subscription ended or the store was down at the time. Returns
    /// the number of sessions rebuilt.
    pub async fn repair_stranded_sessions(&self) -> Result<usize> {
        let mut checked = HashSet::new();
        let mut repaired = 0;

        for entry in self.queue.entries().await? {
            let Some(session_id) = entry.session_id.clone() else {
                continue;
            };
            if entry.is_waiting() || !checked.insert(session_id.clone()) {
                continue;
            }
            if self.sessions.find(&session_id).await?.is_some() {
                continue;
            }

            match self.ensure_session(&entry).await {
                Ok(_) => repaired += 1,
                Err(e) => warn!("Could not rebuild session {}: {}", session_id, e),
            }
        }
        Ok(repaired)
    }
}

/// Build a matchmaker sharing one store, with the given retry policy
pub fn matchmaker_for_store(
    store: Arc<dyn crate::store::Store>,
    clock: Arc<dyn crate::utils::Clock>,
    retry: BackoffPolicy,
    metrics: Arc<MetricsCollector>,
) -> Matchmaker {
    Matchmaker::new(
        WaitingQueue::new(store.clone(), retry),
        SessionRegistry::new(store, clock, retry),
        metrics,
    )
}
