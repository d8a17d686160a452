//! Bus plumbing between a [`PacerStore`] and its peers.
//!
//! Outbound: the store hands changes to the [`Publisher`] through the
//! [`Outbox`] seam. Inbound: a [`SyncWorker`] drains the session topic and
//! [`route`]s each message into the matching `apply_remote_*` call.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pacer_proto::{Envelope, PacerMessage, ProtocolError, SignalChange};
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use transport_bus::{Bus, BusMessage};
use uuid::Uuid;

use crate::error::PacerResult;
use crate::store::{Outbox, PacerStore};

/// Publishes this client's messages on the session channel.
///
/// Every envelope carries a per-instance id so the client can recognise its
/// own messages when the bus echoes them back. The bus sender identity is the
/// participant id, which is what late-join snapshots are addressed to.
pub struct Publisher {
    bus: Arc<dyn Bus>,
    channel: String,
    participant_id: String,
    instance_id: Uuid,
}

impl Publisher {
    pub fn new(bus: Arc<dyn Bus>, channel: impl Into<String>, participant_id: impl Into<String>) -> Self {
        Self {
            bus,
            channel: channel.into(),
            participant_id: participant_id.into(),
            instance_id: Uuid::new_v4(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.bus.subscribe(&self.channel)
    }

    pub fn publish(&self, message: PacerMessage) -> PacerResult<()> {
        let kind = message.kind();
        let bytes = Envelope::new(self.instance_id, message).encode()?;
        self.bus
            .publish(&self.channel, &self.participant_id, Bytes::from(bytes))?;
        trace!(
            target = "pacer.sync",
            channel = %self.channel,
            kind,
            "published pacer message"
        );
        Ok(())
    }

    pub fn request_state(&self) {
        self.emit(PacerMessage::RequestState {});
    }
}

impl Outbox for Publisher {
    fn emit(&self, message: PacerMessage) {
        let kind = message.kind();
        if let Err(err) = self.publish(message) {
            warn!(
                target = "pacer.sync",
                channel = %self.channel,
                kind,
                error = %err,
                "failed to publish pacer message"
            );
        }
    }
}

/// What [`route`] did with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Our own message coming back from the bus.
    Echo,
    Applied,
    /// Leader answered a state request.
    Replied,
    /// A snapshot meant for another participant.
    NotAddressed,
    /// Valid but not for this role, e.g. a state request seen by a non-leader.
    Ignored,
}

/// Decodes one bus message and applies it to `store`.
pub fn route(
    store: &PacerStore,
    publisher: &Publisher,
    message: &BusMessage,
) -> Result<Routed, ProtocolError> {
    let envelope = Envelope::decode(&message.payload)?;
    if envelope.instance_id == publisher.instance_id() {
        return Ok(Routed::Echo);
    }

    let routed = match envelope.message {
        PacerMessage::StatusChanged {
            participant_id,
            status,
        } => {
            store.apply_remote_status(participant_id, status);
            Routed::Applied
        }
        PacerMessage::RequestState {} => {
            if !store.is_leader() {
                return Ok(Routed::Ignored);
            }
            let state = store.snapshot().state();
            debug!(
                target = "pacer.sync",
                requester = %message.sender,
                "answering state request"
            );
            publisher.emit(PacerMessage::StateSnapshot {
                target_participant_id: message.sender.clone(),
                state,
            });
            Routed::Replied
        }
        PacerMessage::StateSnapshot {
            target_participant_id,
            state,
        } => {
            if target_participant_id != publisher.participant_id() {
                return Ok(Routed::NotAddressed);
            }
            store.apply_remote_snapshot(state);
            Routed::Applied
        }
        other => match other.signal_change() {
            Some(change) => {
                apply_remote_change(store, change);
                Routed::Applied
            }
            None => Routed::Ignored,
        },
    };
    Ok(routed)
}

fn apply_remote_change(store: &PacerStore, change: SignalChange) {
    match change {
        SignalChange::Soft => store.apply_remote_soft_signal(),
        SignalChange::Countdown { deadline } => store.apply_remote_countdown(deadline),
        SignalChange::FloorOpen => store.apply_remote_floor_open(),
        SignalChange::Cancel => store.apply_remote_cancel(),
        SignalChange::Reset => store.apply_remote_reset(),
    }
}

/// Background task feeding the session topic into a store.
pub struct SyncWorker {
    handle: JoinHandle<()>,
}

impl SyncWorker {
    /// Subscribes before returning, so nothing published after `spawn` is
    /// missed.
    pub fn spawn(store: PacerStore, publisher: Arc<Publisher>) -> Self {
        let rx = publisher.subscribe();
        Self::attach(store, publisher, rx)
    }

    /// Starts draining a receiver taken earlier with [`Publisher::subscribe`].
    /// Messages that arrived in between are routed first, in order.
    pub fn attach(
        store: PacerStore,
        publisher: Arc<Publisher>,
        mut rx: broadcast::Receiver<BusMessage>,
    ) -> Self {
        let runtime = store.runtime().clone();
        let handle = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if store.is_closed() {
                            break;
                        }
                        match route(&store, &publisher, &message) {
                            Ok(routed) => trace!(
                                target = "pacer.sync",
                                sender = %message.sender,
                                routed = ?routed,
                                "routed pacer message"
                            ),
                            Err(err) => debug!(
                                target = "pacer.sync",
                                sender = %message.sender,
                                error = %err,
                                "dropping undecodable pacer message"
                            ),
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            target = "pacer.sync",
                            skipped,
                            "pacer subscriber lagged behind the bus"
                        );
                        if !store.is_leader() {
                            publisher.request_state();
                        }
                    }
                    Err(RecvError::Closed) => {
                        info!(target = "pacer.sync", "pacer channel closed");
                        break;
                    }
                }
            }
        });
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Asks the leader for a snapshot once `delay` has passed, giving the bus
/// time to settle after joining.
pub fn request_state_after(
    runtime: &Handle,
    publisher: Arc<Publisher>,
    delay: Duration,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        debug!(
            target = "pacer.sync",
            participant_id = %publisher.participant_id(),
            "requesting session state"
        );
        publisher.request_state();
    })
}
