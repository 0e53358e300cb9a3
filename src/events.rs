//! Notifications emitted by the engine.
//!
//! Callers subscribe with [`UpdateEngine::subscribe`](crate::engine::UpdateEngine::subscribe)
//! and receive every event on a broadcast channel. Emission never blocks the
//! engine: with no subscriber, or a lagging one, events are dropped.

use std::path::PathBuf;
use tokio::sync::broadcast;

/// Bytes transferred so far, with the total when the server declared one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes present in the target file.
    pub downloaded: u64,
    /// Declared size of the whole file, if known.
    pub total: Option<u64>,
}

impl Progress {
    /// Build progress from a byte count and a total where 0 means unknown.
    pub const fn new(downloaded: u64, total: u64) -> Self {
        Self {
            downloaded,
            total: if total > 0 { Some(total) } else { None },
        }
    }

    /// Completion percentage, `None` when the total is unknown.
    pub fn percent(&self) -> Option<u8> {
        let total = self.total?;
        let pct = (u128::from(self.downloaded) * 100 / u128::from(total)).min(100);
        u8::try_from(pct).ok()
    }
}

/// Something the caller may want to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// Transfer progress.
    Progress(Progress),
    /// A transient failure is about to be retried.
    Retrying {
        /// 1-based retry number
        attempt: u32,
        /// Error that triggered the retry
        reason: String,
    },
    /// A version check finished (or was skipped).
    CheckComplete {
        /// False when the manifest could not be fetched
        success: bool,
        /// Status line
        message: String,
    },
    /// A version check found an update.
    UpdateFound {
        /// Advertised version
        version: String,
        /// Download location
        url: String,
    },
    /// The download completed with the declared size.
    DownloadFinished {
        /// Location of the downloaded executable
        path: PathBuf,
    },
    /// The download failed terminally.
    DownloadFailed {
        /// Human-readable cause
        reason: String,
    },
}

/// Sending half shared by the engine's components.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<UpdateEvent>,
}

impl EventSink {
    /// Create a sink buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event; dropped if nobody listens.
    pub fn emit(&self, event: UpdateEvent) {
        let _ = self.tx.send(event);
    }

    /// Receive all events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(256)
    }
}
