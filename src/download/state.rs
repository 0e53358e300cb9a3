//! Durable records of in-flight downloads and deferred installs.

use crate::constants::{DOWNLOAD_STATE_MAX_AGE, DOWNLOAD_STATE_RECORD, PENDING_UPDATE_RECORD};
use crate::core::Result;
use crate::events::Progress;
use crate::store::{RecordStore, load_json, save_json};
use crate::utils::fs::{file_len, remove_file_if_exists};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One resumable transfer.
///
/// `bytes_downloaded` is only ever written after the partial file has been
/// flushed to at least that length, so it never runs ahead of the bytes on
/// disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadState {
    /// Source URL; a resume is only attempted against the same URL.
    pub url: String,
    /// Version being downloaded.
    pub version: String,
    /// Partial file on disk.
    pub file_path: PathBuf,
    /// Bytes flushed to `file_path` at the last checkpoint.
    pub bytes_downloaded: u64,
    /// Declared size of the whole file, 0 when unknown.
    #[serde(default)]
    pub total_size: u64,
    /// When the checkpoint was written.
    pub last_saved_at: DateTime<Utc>,
}

impl DownloadState {
    /// Progress as of the last checkpoint.
    pub const fn progress(&self) -> Progress {
        Progress::new(self.bytes_downloaded, self.total_size)
    }

    /// Whether the record can still drive a resume at `now`.
    ///
    /// The partial file must exist and hold at least the recorded bytes, and
    /// the checkpoint must be younger than the staleness bound.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        let Some(len) = file_len(&self.file_path) else {
            return false;
        };
        if len < self.bytes_downloaded {
            return false;
        }

        let max_age = chrono::Duration::from_std(DOWNLOAD_STATE_MAX_AGE)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        now.signed_duration_since(self.last_saved_at) < max_age
    }
}

/// A downloaded update waiting for the next startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpdate {
    /// Downloaded executable.
    pub new_exe_path: PathBuf,
    /// Executable it replaces.
    pub current_exe_path: PathBuf,
    /// Version of `new_exe_path`.
    pub version: String,
    /// When the install was deferred.
    pub queued_at: DateTime<Utc>,
    /// Length of `new_exe_path` when the install was deferred.
    #[serde(default)]
    pub expected_len: Option<u64>,
}

impl PendingUpdate {
    /// Whether the downloaded executable is still on disk, unchanged in
    /// length since it was queued.
    pub fn is_installable(&self) -> bool {
        match (file_len(&self.new_exe_path), self.expected_len) {
            (None, _) => false,
            (Some(len), Some(expected)) => len == expected,
            (Some(_), None) => true,
        }
    }
}

/// Persistence for [`DownloadState`] and [`PendingUpdate`].
///
/// Load operations never fail: absent or corrupt records read as `None`.
#[derive(Clone)]
pub struct DownloadStateStore {
    store: Arc<dyn RecordStore>,
}

impl DownloadStateStore {
    /// Create a state store backed by `store`.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// The raw download record, without validation.
    pub fn load_download_state(&self) -> Option<DownloadState> {
        load_json(self.store.as_ref(), DOWNLOAD_STATE_RECORD)
    }

    /// Write a checkpoint.
    pub fn save_download_state(&self, state: &DownloadState) -> Result<()> {
        debug!(
            "Checkpoint {} at {}/{} bytes",
            state.url, state.bytes_downloaded, state.total_size
        );
        save_json(self.store.as_ref(), DOWNLOAD_STATE_RECORD, state)
    }

    /// Delete the download record. The partial file is left alone.
    pub fn clear_download_state(&self) -> Result<()> {
        self.store.remove(DOWNLOAD_STATE_RECORD)
    }

    /// The download record if it is still valid at `now`.
    ///
    /// An invalid record is deleted together with its partial file so it can
    /// never mislead a later resume.
    pub fn load_valid_download_state(&self, now: DateTime<Utc>) -> Option<DownloadState> {
        let state = self.load_download_state()?;
        if state.is_valid(now) {
            return Some(state);
        }

        info!("Discarding stale download record for {}", state.url);
        self.discard_download(&state);
        None
    }

    /// Delete a download record and its partial file, logging failures.
    pub fn discard_download(&self, state: &DownloadState) {
        if let Err(e) = self.clear_download_state() {
            warn!("Failed to remove download record: {}", e);
        }
        if let Err(e) = remove_file_if_exists(&state.file_path) {
            warn!("Failed to remove partial download: {:#}", e);
        }
    }

    /// The deferred install, if any.
    pub fn load_pending(&self) -> Option<PendingUpdate> {
        load_json(self.store.as_ref(), PENDING_UPDATE_RECORD)
    }

    /// Record a deferred install.
    pub fn save_pending(&self, pending: &PendingUpdate) -> Result<()> {
        info!("Queued update {} for next startup", pending.version);
        save_json(self.store.as_ref(), PENDING_UPDATE_RECORD, pending)
    }

    /// Delete the deferred install record.
    pub fn clear_pending(&self) -> Result<()> {
        self.store.remove(PENDING_UPDATE_RECORD)
    }

    /// On-disk location of the pending record, for the replacement helper.
    pub fn pending_record_path(&self) -> Option<PathBuf> {
        self.store.location(PENDING_UPDATE_RECORD)
    }
}
