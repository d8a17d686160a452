#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use beach_pacer::clock::{Clock, RuntimeClock};
use beach_pacer::persistence::SnapshotStore;
use beach_pacer::role::LeaderFlag;
use beach_pacer::{Config, PacerClient, SessionSnapshot, StoreConfig};
use tokio::sync::mpsc;
use transport_bus::{Bus, LocalBus};

pub const CHANNEL: &str = "test.pacer.session";

/// Clients sharing one in-process bus and one virtual clock.
pub struct Session {
    pub bus: Arc<LocalBus>,
    pub clock: Arc<RuntimeClock>,
    pub config: Config,
}

impl Session {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(LocalBus::new()),
            clock: Arc::new(RuntimeClock::new()),
            config: Config {
                channel: CHANNEL.to_string(),
                ..Config::default()
            },
        }
    }

    pub async fn join(&self, participant_id: &str, leader: bool) -> PacerClient {
        self.join_with(participant_id, leader, None).await
    }

    pub async fn join_with(
        &self,
        participant_id: &str,
        leader: bool,
        persistence: Option<Arc<dyn SnapshotStore>>,
    ) -> PacerClient {
        let config = self.config.for_participant(participant_id);
        let store_config = StoreConfig::from_config(&config)
            .with_clock(self.clock.clone())
            .with_persistence(persistence);
        let bus: Arc<dyn Bus> = self.bus.clone();
        PacerClient::connect_with(config, bus, Arc::new(LeaderFlag::new(leader)), store_config)
            .await
            .expect("connect")
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }
}

/// Lets in-flight bus traffic and notifications drain.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Past the late-join request delay, so joins are quiet afterwards.
pub async fn settle_join(session: &Session) {
    tokio::time::sleep(session.config.state_request_delay + Duration::from_millis(100)).await;
}

/// Resolves with the first snapshot satisfying `done`, current state included.
pub async fn wait_until<F>(client: &PacerClient, done: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = client.store().subscribe(move |snapshot| {
        let _ = tx.send(snapshot.clone());
    });
    let current = client.snapshot();
    if done(&current) {
        return current;
    }
    loop {
        let snapshot = rx.recv().await.expect("store closed while waiting");
        if done(&snapshot) {
            return snapshot;
        }
    }
}
