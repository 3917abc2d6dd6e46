use tokio::sync::broadcast;
use tracing::debug;

use crate::job::state::JobStatus;

/// User-facing notices, the toast-equivalent side channel. These carry
/// conditions the UI must surface outside the job state label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Multicast search could not run on this network
    MulticastUnavailable,
    /// A renderer rejected the playback command pair
    PlaybackFailed,
    /// The selected device exposes no AVTransport control URL
    PlayerIncompatible,
    /// Network attachment was lost while a job was active
    ConnectionLost,
    /// Cache files were removed on request
    CacheCleared,
    /// The preparation pipeline failed with the given message
    JobFailed(String),
}

/// Events emitted by the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Job status changed (progress updates flow through the job state
    /// watch channel, not the bus)
    StatusChanged(JobStatus),
    /// A transient user-facing notice
    Notice(Notice),
}

/// Broadcast bus connecting the engine to whatever frontend is attached.
/// Subscribers that lag simply miss old events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; dropped silently when nobody listens
    pub fn emit(&self, event: EngineEvent) {
        debug!("Engine event: {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn notice(&self, notice: Notice) {
        self.emit(EngineEvent::Notice(notice));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
