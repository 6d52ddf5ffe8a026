//! Pairing simulator CLI tool
//!
//! Drives many concurrent parties against an in-process store, then checks
//! that every session was seen by exactly two distinct parties.
//!
//! Usage:
//!   cargo run --bin pairing-sim -- --help
//!   cargo run --bin pairing-sim contention --parties 64
//!   cargo run --bin pairing-sim churn --parties 16 --cycles 20 --leave-every 3
//!   cargo run --bin pairing-sim scenario

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use pairing_room::config::BackoffPolicy;
use pairing_room::matchmaker::{matchmaker_for_store, Matchmaker};
use pairing_room::metrics::{MetricsCollector, PairingOutcomeLabel};
use pairing_room::party::PartyHandle;
use pairing_room::store::InMemoryStore;
use pairing_room::utils::{Clock, ManualClock, SequentialSessionIds, SystemClock};
use pairing_room::SessionId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "pairing-sim")]
#[command(about = "Concurrency simulator for the pairing-room matchmaker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Conflict re-runs allowed per store transaction
    #[arg(long, default_value = "25")]
    max_transaction_retries: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// All parties join at once; every pair must be formed exactly once
    Contention {
        /// Number of parties
        #[arg(short, long, default_value = "32")]
        parties: usize,
    },
    /// Parties repeatedly join, get matched, end their session and rejoin
    Churn {
        /// Number of parties
        #[arg(short, long, default_value = "16")]
        parties: usize,
        /// Join cycles per party
        #[arg(short, long, default_value = "10")]
        cycles: usize,
        /// Every n-th cycle a party leaves instead of waiting (0 = never)
        #[arg(short, long, default_value = "0")]
        leave_every: usize,
        /// Seconds to wait for a match before giving up on a cycle
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },
    /// Two parties, alice then bob, with sequential session ids
    Scenario,
}

/// A match seen by one party
#[derive(Debug, Clone)]
struct Sighting {
    party_id: String,
    session_id: SessionId,
}

fn build_matchmaker(max_transaction_retries: usize, clock: Arc<dyn Clock>) -> Result<Arc<Matchmaker>> {
    let metrics = Arc::new(MetricsCollector::new()?);
    let matchmaker = matchmaker_for_store(
        Arc::new(InMemoryStore::new(max_transaction_retries)),
        clock,
        BackoffPolicy::default(),
        metrics,
    )
    .with_session_ids(Arc::new(SequentialSessionIds::new("s")));
    Ok(Arc::new(matchmaker))
}

/// Every session seen by exactly two distinct parties, nobody twice in one session
fn check_sightings(sightings: &[Sighting]) -> Result<usize> {
    let mut by_session: HashMap<&str, Vec<&str>> = HashMap::new();
    for sighting in sightings {
        by_session
            .entry(sighting.session_id.as_str())
            .or_default()
            .push(sighting.party_id.as_str());
    }

    for (session_id, parties) in &by_session {
        let distinct: HashSet<&&str> = parties.iter().collect();
        if parties.len() != 2 || distinct.len() != 2 {
            return Err(anyhow!(
                "session {} was seen by {:?}, expected two distinct parties",
                session_id,
                parties
            ));
        }
    }
    Ok(by_session.len())
}

async fn run_contention(matchmaker: Arc<Matchmaker>, parties: usize) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let started = Instant::now();

    let mut tasks = Vec::with_capacity(parties);
    for i in 0..parties {
        let matchmaker = matchmaker.clone();
        let clock = clock.clone();

        tasks.push(tokio::spawn(async move {
            let mut party = PartyHandle::new(format!("party-{}", i), matchmaker, clock);
            let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
            party.subscribe(move |session_id| {
                let _ = seen_tx.send(session_id);
            })?;
            party.join().await?;

            let seen = tokio::time::timeout(Duration::from_secs(10), seen_rx.recv()).await;
            let sighting = match seen {
                Ok(Some(session_id)) => Some(Sighting {
                    party_id: party.party_id().to_string(),
                    session_id,
                }),
                _ => None,
            };
            Ok::<_, anyhow::Error>(sighting)
        }));
    }

    let mut sightings = Vec::new();
    for task in tasks {
        if let Some(sighting) = task.await?? {
            sightings.push(sighting);
        }
    }

    let expected = parties - parties % 2;
    let sessions = check_sightings(&sightings)?;
    let metrics = matchmaker.metrics();
    println!("Contention with {} parties:", parties);
    println!("  Sessions formed: {}", sessions);
    println!("  Parties matched: {}", sightings.len());
    println!(
        "  Attempts: formed={} lost_race={} not_enough={} failed={}",
        metrics.pairing_attempts(PairingOutcomeLabel::Formed),
        metrics.pairing_attempts(PairingOutcomeLabel::LostRace),
        metrics.pairing_attempts(PairingOutcomeLabel::NotEnoughCandidates),
        metrics.pairing_attempts(PairingOutcomeLabel::Failed),
    );
    println!("  Elapsed: {:?}", started.elapsed());

    if sightings.len() != expected {
        return Err(anyhow!(
            "{} of {} parties were matched",
            sightings.len(),
            expected
        ));
    }
    Ok(())
}

async fn run_churn(
    matchmaker: Arc<Matchmaker>,
    parties: usize,
    cycles: usize,
    leave_every: usize,
    timeout: Duration,
) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (tx, mut rx) = mpsc::unbounded_channel::<Sighting>();
    let started = Instant::now();

    let mut tasks = Vec::with_capacity(parties);
    for i in 0..parties {
        let matchmaker = matchmaker.clone();
        let clock = clock.clone();
        let tx = tx.clone();

        tasks.push(tokio::spawn(async move {
            let mut party = PartyHandle::new(format!("party-{}", i), matchmaker, clock);
            let mut matched = 0usize;
            let mut left = 0usize;

            for cycle in 1..=cycles {
                let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
                party.subscribe(move |session_id| {
                    let _ = seen_tx.send(session_id);
                })?;
                party.join().await?;

                if leave_every > 0 && cycle % leave_every == 0 && party.leave().await? {
                    debug!("{} left in cycle {}", party.party_id(), cycle);
                    party.unsubscribe();
                    left += 1;
                    continue;
                }

                match tokio::time::timeout(timeout, seen_rx.recv()).await {
                    Ok(Some(session_id)) => {
                        let _ = tx.send(Sighting {
                            party_id: party.party_id().to_string(),
                            session_id: session_id.clone(),
                        });
                        party.end_session(&session_id).await?;
                        matched += 1;
                    }
                    _ => {
                        // Nobody left to pair with; a later leave is a no-op if we got matched meanwhile
                        party.leave().await?;
                        party.unsubscribe();
                    }
                }
            }
            Ok::<_, anyhow::Error>((matched, left))
        }));
    }
    drop(tx);

    let mut matched = 0;
    let mut left = 0;
    for task in tasks {
        let (m, l) = task.await??;
        matched += m;
        left += l;
    }

    let mut sightings = Vec::new();
    while let Ok(sighting) = rx.try_recv() {
        sightings.push(sighting);
    }

    // A party that timed out may have been matched right after; only complete pairs are checked
    let complete: Vec<Sighting> = {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for s in &sightings {
            *counts.entry(s.session_id.as_str()).or_default() += 1;
        }
        sightings
            .iter()
            .filter(|s| counts.get(s.session_id.as_str()) == Some(&2))
            .cloned()
            .collect()
    };
    let sessions = check_sightings(&complete)?;

    println!("Churn with {} parties x {} cycles:", parties, cycles);
    println!("  Matches seen: {}", matched);
    println!("  Leaves: {}", left);
    println!("  Complete sessions: {}", sessions);
    println!(
        "  Sessions created: {}",
        matchmaker.metrics().session().sessions_created_total.get()
    );
    println!("  Elapsed: {:?}", started.elapsed());
    Ok(())
}

async fn run_scenario(max_transaction_retries: usize) -> Result<()> {
    let clock = Arc::new(ManualClock::new(0));
    let matchmaker = build_matchmaker(max_transaction_retries, clock.clone())?;

    let mut alice = PartyHandle::new("alice", matchmaker.clone(), clock.clone());
    let mut bob = PartyHandle::new("bob", matchmaker.clone(), clock.clone());
    let (tx, mut rx) = mpsc::unbounded_channel::<Sighting>();

    alice.join().await?;
    let alice_tx = tx.clone();
    alice.subscribe(move |session_id| {
        let _ = alice_tx.send(Sighting {
            party_id: "alice".to_string(),
            session_id,
        });
    })?;

    clock.set(5);
    bob.join().await?;
    bob.subscribe(move |session_id| {
        let _ = tx.send(Sighting {
            party_id: "bob".to_string(),
            session_id,
        });
    })?;

    let mut sightings = Vec::new();
    while sightings.len() < 2 {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(sighting)) => sightings.push(sighting),
            _ => return Err(anyhow!("scenario timed out after {} matches", sightings.len())),
        }
    }
    check_sightings(&sightings)?;

    let session = matchmaker.sessions().get(&sightings[0].session_id).await?;
    println!("Scenario completed:");
    for sighting in &sightings {
        println!("  {} matched into {}", sighting.party_id, sighting.session_id);
    }
    println!(
        "  Session {} members: {:?}",
        session.session_id,
        session.member_ids()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    info!("Starting pairing simulator");

    match cli.command {
        Commands::Contention { parties } => {
            let matchmaker = build_matchmaker(cli.max_transaction_retries, Arc::new(SystemClock))?;
            run_contention(matchmaker, parties).await?;
        }
        Commands::Churn {
            parties,
            cycles,
            leave_every,
            timeout,
        } => {
            let matchmaker = build_matchmaker(cli.max_transaction_retries, Arc::new(SystemClock))?;
            run_churn(
                matchmaker,
                parties,
                cycles,
                leave_every,
                Duration::from_secs(timeout),
            )
            .await?;
        }
        Commands::Scenario => run_scenario(cli.max_transaction_retries).await?,
    }

    Ok(())
}
