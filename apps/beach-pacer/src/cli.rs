use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use beach_pacer::clock::{Clock, SystemClock};
use beach_pacer::persistence::{self, JsonFileSnapshotStore, SnapshotStore};
use beach_pacer::role::LeaderFlag;
use beach_pacer::{Config, PacerClient, ParticipantStatus, SessionSignal, SessionSnapshot};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};
use transport_bus::{Bus, LocalBus};

#[derive(Parser, Debug)]
#[command(name = "beach-pacer")]
#[command(about = "Presence and pacing signals for a shared beach session")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a whole session in-process and print every client's final state
    Simulate {
        /// Participants besides the leader (a late joiner is added on top)
        #[arg(short, long, default_value_t = 3)]
        participants: usize,

        /// Countdown the leader starts, in seconds
        #[arg(short, long, default_value_t = 5)]
        countdown: u64,

        /// Persist the leader's state to this file
        #[arg(long, env = "PACER_STATE_FILE")]
        state_file: Option<PathBuf>,
    },

    /// Print a persisted session record
    Inspect {
        #[arg(long, env = "PACER_STATE_FILE")]
        state_file: PathBuf,
    },
}

const LEADER_ID: &str = "leader";
const LATE_JOINER_ID: &str = "late-joiner";
const SETTLE: Duration = Duration::from_millis(200);

pub async fn run_simulation(
    participants: usize,
    countdown_secs: u64,
    state_file: Option<PathBuf>,
) -> Result<()> {
    let base = Config {
        state_file,
        ..Config::from_env()
    };
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let persistence = persistence::from_config(&base)
        .await
        .context("failed to open leader persistence")?;

    let leader = connect(&base, LEADER_ID, true, &bus, persistence).await?;
    let mut clients = Vec::with_capacity(participants);
    for index in 1..=participants {
        let id = format!("participant-{index}");
        clients.push(connect(&base, &id, false, &bus, None).await?);
    }
    tokio::time::sleep(SETTLE).await;

    for client in &clients {
        client.set_status(ParticipantStatus::HandRaised);
    }
    wait_for(&leader, SETTLE * 5, |snapshot| {
        snapshot.hand_raised_count >= participants
    })
    .await
    .context("leader never saw every raised hand")?;
    info!(
        target = "pacer.sync",
        hands = participants,
        "all participants raised hands"
    );

    if !leader.store().start_countdown(countdown_secs) {
        return Err(anyhow!("leader refused to start the countdown"));
    }

    let late = connect(&base, LATE_JOINER_ID, false, &bus, None).await?;
    let recovered = wait_for(
        &late,
        base.state_request_delay + Duration::from_secs(5),
        |snapshot| {
            snapshot.signal == SessionSignal::Countdown
                && snapshot.hand_raised_count >= participants
        },
    )
    .await
    .context("late joiner never received a state snapshot")?;
    info!(
        target = "pacer.sync",
        signal = ?recovered.signal,
        remaining = ?recovered.remaining_seconds,
        "late joiner recovered session state"
    );
    clients.push(late);

    let budget = Duration::from_secs(countdown_secs) + base.tick_interval * 3;
    wait_for(&leader, budget, |snapshot| {
        snapshot.signal == SessionSignal::None
    })
    .await
    .context("countdown never expired on the leader")?;
    tokio::time::sleep(SETTLE).await;

    let report: Vec<_> = std::iter::once(&leader)
        .chain(clients.iter())
        .map(|client| {
            json!({
                "participant_id": client.participant_id(),
                "leader": client.store().is_leader(),
                "snapshot": client.snapshot(),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&report)?);

    let diverged = clients
        .iter()
        .filter(|client| client.snapshot().state() != leader.snapshot().state())
        .count();
    if diverged > 0 {
        warn!(target = "pacer.sync", diverged, "replicas did not converge");
    }

    for client in clients.iter().chain(std::iter::once(&leader)) {
        client.close();
    }
    Ok(())
}

pub async fn run_inspect(state_file: PathBuf) -> Result<()> {
    let store = JsonFileSnapshotStore::new(&state_file);
    let Some(saved) = store
        .load()
        .await
        .with_context(|| format!("failed to read {}", state_file.display()))?
    else {
        println!("no session record at {}", state_file.display());
        return Ok(());
    };

    let now = SystemClock.now_millis();
    let mut state = saved.normalized();
    if state.expire_elapsed_countdown(now) {
        info!(target = "pacer.persist", "recorded countdown has already expired");
    }
    println!("{}", serde_json::to_string_pretty(&state.snapshot_at(now))?);
    Ok(())
}

async fn connect(
    base: &Config,
    participant_id: &str,
    leader: bool,
    bus: &Arc<dyn Bus>,
    persistence: Option<Arc<dyn SnapshotStore>>,
) -> Result<PacerClient> {
    PacerClient::connect(
        base.for_participant(participant_id),
        bus.clone(),
        Arc::new(LeaderFlag::new(leader)),
        persistence,
    )
    .await
    .with_context(|| format!("failed to connect {participant_id}"))
}

async fn wait_for<F>(client: &PacerClient, limit: Duration, done: F) -> Result<SessionSnapshot>
where
    F: Fn(&SessionSnapshot) -> bool,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = client.store().subscribe(move |snapshot| {
        let _ = tx.send(snapshot.clone());
    });
    let current = client.snapshot();
    if done(&current) {
        return Ok(current);
    }
    tokio::time::timeout(limit, async {
        while let Some(snapshot) = rx.recv().await {
            if done(&snapshot) {
                return Some(snapshot);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
    .ok_or_else(|| anyhow!("timed out after {limit:?}"))
}
