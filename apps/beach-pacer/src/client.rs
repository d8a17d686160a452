use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pacer_proto::{ParticipantStatus, SessionSnapshot};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use transport_bus::Bus;
use uuid::Uuid;

use crate::config::Config;
use crate::directory::{participant_view, ParticipantDirectory, ParticipantView};
use crate::error::PacerResult;
use crate::persistence::SnapshotStore;
use crate::role::LeaderRole;
use crate::store::{PacerStore, StoreConfig};
use crate::sync::{request_state_after, Publisher, SyncWorker};

/// One participant's view of the session, wired to the bus.
pub struct PacerClient {
    config: Config,
    store: PacerStore,
    publisher: Arc<Publisher>,
    worker: SyncWorker,
    state_request: Mutex<Option<JoinHandle<()>>>,
    scene_loaded: AtomicBool,
    closed: AtomicBool,
}

impl PacerClient {
    pub async fn connect(
        config: Config,
        bus: Arc<dyn Bus>,
        role: Arc<dyn LeaderRole>,
        persistence: Option<Arc<dyn SnapshotStore>>,
    ) -> PacerResult<Self> {
        let store_config = StoreConfig::from_config(&config).with_persistence(persistence);
        Self::connect_with(config, bus, role, store_config).await
    }

    /// Like [`PacerClient::connect`] with full control over the store, e.g. to
    /// inject a clock.
    pub async fn connect_with(
        config: Config,
        bus: Arc<dyn Bus>,
        role: Arc<dyn LeaderRole>,
        store_config: StoreConfig,
    ) -> PacerResult<Self> {
        let publisher = Arc::new(Publisher::new(
            bus,
            config.channel.clone(),
            config.participant_id.clone(),
        ));
        let store = PacerStore::new(role, publisher.clone(), store_config)?;

        // Inbound traffic buffers in the receiver until the restored state is
        // in place, so restore neither answers nor overwrites it.
        let rx = publisher.subscribe();
        let leader = store.is_leader();
        if leader {
            store.restore().await;
        }
        let worker = SyncWorker::attach(store.clone(), publisher.clone(), rx);

        let state_request = if leader {
            None
        } else {
            Some(request_state_after(
                store.runtime(),
                publisher.clone(),
                config.state_request_delay,
            ))
        };

        info!(
            target = "pacer.sync",
            participant_id = %config.participant_id,
            instance_id = %publisher.instance_id(),
            channel = %config.channel,
            leader,
            "pacer client connected"
        );

        Ok(Self {
            config,
            store,
            publisher,
            worker,
            state_request: Mutex::new(state_request),
            scene_loaded: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &PacerStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn participant_id(&self) -> &str {
        &self.config.participant_id
    }

    pub fn instance_id(&self) -> Uuid {
        self.publisher.instance_id()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.store.snapshot()
    }

    pub fn set_status(&self, status: ParticipantStatus) {
        self.store
            .set_own_status(self.config.participant_id.clone(), status);
    }

    /// Exempt participants keep syncing but should not render pacer UI.
    pub fn presentation_enabled(&self) -> bool {
        !self.config.is_exempt(&self.config.participant_id)
    }

    /// Host hook for scene switches. The first call is the initial load and
    /// is ignored; later ones reset the session when configured to and this
    /// client leads. Returns whether a reset happened.
    pub fn scene_changed(&self) -> bool {
        if !self.scene_loaded.swap(true, Ordering::AcqRel) {
            return false;
        }
        if !self.config.reset_on_scene_change {
            return false;
        }
        let reset = self.store.reset_all();
        if reset {
            debug!(target = "pacer.store", "scene changed; session reset");
        }
        reset
    }

    pub fn roster(&self, directory: &dyn ParticipantDirectory) -> Vec<ParticipantView> {
        participant_view(&self.store.snapshot(), directory)
    }

    /// Stops syncing and tears the store down. Idempotent; also runs on drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(pending) = self.state_request.lock().take() {
            pending.abort();
        }
        self.worker.stop();
        self.store.close();
        info!(
            target = "pacer.sync",
            participant_id = %self.config.participant_id,
            "pacer client closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for PacerClient {
    fn drop(&mut self) {
        self.close();
    }
}
