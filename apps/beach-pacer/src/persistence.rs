//! Durable snapshots of the leader's replica.
//!
//! One opaque record keyed by [`STATE_KEY`]; last writer wins. Writes go
//! through a single background writer fed by a watch channel, so bursts of
//! mutations collapse into the latest state and never land out of order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use pacer_proto::SessionState;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::Config;

pub const STATE_KEY: &str = "beach.pacer.state";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[cfg(feature = "redis-store")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Option<SessionState>, PersistenceError>;
    async fn save(&self, state: &SessionState) -> Result<(), PersistenceError>;
}

/// In-memory adapter for tests and ephemeral sessions.
pub struct InMemorySnapshotStore {
    record: watch::Sender<Option<SessionState>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl InMemorySnapshotStore {
    pub fn new() -> Arc<Self> {
        Self::with_state(None)
    }

    pub fn with_state(state: Option<SessionState>) -> Arc<Self> {
        Arc::new(Self {
            record: watch::channel(state).0,
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn current(&self) -> Option<SessionState> {
        self.record.borrow().clone()
    }

    /// Observe successive saved records.
    pub fn watch(&self) -> watch::Receiver<Option<SessionState>> {
        self.record.subscribe()
    }

    /// Makes every subsequent save fail, to exercise degraded operation.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self) -> Result<Option<SessionState>, PersistenceError> {
        Ok(self.current())
    }

    async fn save(&self, state: &SessionState) -> Result<(), PersistenceError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("writes disabled".into()));
        }
        self.record.send_replace(Some(state.clone()));
        Ok(())
    }
}

/// JSON file adapter. Saves write a sibling temp file and rename it over the
/// target so a crash never leaves a torn record.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    path: PathBuf,
}

impl JsonFileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| STATE_KEY.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileSnapshotStore {
    async fn load(&self) -> Result<Option<SessionState>, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn save(&self, state: &SessionState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, serde_json::to_vec_pretty(state)?).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

#[cfg(feature = "redis-store")]
pub use self::redis_store::RedisSnapshotStore;

#[cfg(feature = "redis-store")]
mod redis_store {
    use redis::aio::ConnectionManager;
    use redis::{AsyncCommands, Client};

    use super::*;

    #[derive(Clone)]
    pub struct RedisSnapshotStore {
        redis: ConnectionManager,
        key: String,
    }

    impl RedisSnapshotStore {
        pub async fn connect(redis_url: &str) -> Result<Self, PersistenceError> {
            let client = Client::open(redis_url)?;
            let redis = ConnectionManager::new(client).await?;
            Ok(Self {
                redis,
                key: STATE_KEY.to_string(),
            })
        }

        pub fn with_key(mut self, key: impl Into<String>) -> Self {
            self.key = key.into();
            self
        }
    }

    #[async_trait]
    impl SnapshotStore for RedisSnapshotStore {
        async fn load(&self) -> Result<Option<SessionState>, PersistenceError> {
            let mut conn = self.redis.clone();
            let value: Option<String> = conn.get(&self.key).await?;
            match value {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        }

        async fn save(&self, state: &SessionState) -> Result<(), PersistenceError> {
            let mut conn = self.redis.clone();
            let value = serde_json::to_string(state)?;
            conn.set::<_, _, ()>(&self.key, value).await?;
            Ok(())
        }
    }
}

/// Picks the adapter named by the configuration: redis when built with the
/// `redis-store` feature and a url is set, else a state file, else none.
pub async fn from_config(
    config: &Config,
) -> Result<Option<Arc<dyn SnapshotStore>>, PersistenceError> {
    if let Some(store) = redis_from_config(config).await? {
        return Ok(Some(store));
    }
    Ok(config
        .state_file
        .as_ref()
        .map(|path| Arc::new(JsonFileSnapshotStore::new(path)) as Arc<dyn SnapshotStore>))
}

#[cfg(feature = "redis-store")]
async fn redis_from_config(
    config: &Config,
) -> Result<Option<Arc<dyn SnapshotStore>>, PersistenceError> {
    match &config.redis_url {
        Some(url) => Ok(Some(Arc::new(RedisSnapshotStore::connect(url).await?))),
        None => Ok(None),
    }
}

#[cfg(not(feature = "redis-store"))]
async fn redis_from_config(
    config: &Config,
) -> Result<Option<Arc<dyn SnapshotStore>>, PersistenceError> {
    if config.redis_url.is_some() {
        warn!(
            target = "pacer.persist",
            "redis url configured but beach-pacer was built without redis-store"
        );
    }
    Ok(None)
}

/// Background writer draining the latest submitted state into a store.
pub(crate) struct PersistWriter {
    tx: Mutex<Option<watch::Sender<Option<SessionState>>>>,
}

impl PersistWriter {
    pub(crate) fn spawn(runtime: &Handle, store: Arc<dyn SnapshotStore>) -> Self {
        let (tx, mut rx) = watch::channel::<Option<SessionState>>(None);
        runtime.spawn(async move {
            // Ends once the sender is dropped and the last value was written.
            while rx.changed().await.is_ok() {
                let pending = rx.borrow_and_update().clone();
                let Some(state) = pending else {
                    continue;
                };
                match store.save(&state).await {
                    Ok(()) => debug!(
                        target = "pacer.persist",
                        signal = ?state.signal,
                        participants = state.participant_status.len(),
                        "persisted session state"
                    ),
                    Err(err) => warn!(
                        target = "pacer.persist",
                        error = %err,
                        "failed to persist session state; continuing in memory"
                    ),
                }
            }
        });
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    pub(crate) fn submit(&self, state: SessionState) {
        if let Some(tx) = self.tx.lock().as_ref() {
            tx.send_replace(Some(state));
        }
    }

    /// Stops accepting writes; the pending write, if any, still completes.
    /// Dropping the writer has the same effect.
    pub(crate) fn close(&self) {
        self.tx.lock().take();
    }
}
