//! Resumable, retrying, pausable download of the new executable.
//!
//! # Resume protocol
//!
//! Every attempt starts by consulting the [`DownloadStateStore`]:
//!
//! 1. A valid record for the same URL and target file means the partial file
//!    is truncated to the recorded length and the request carries
//!    `Range: bytes=<recorded>-`.
//! 2. A record for a different URL, or an invalid one (file missing, shorter
//!    than recorded, older than 24h), is discarded with its partial file and
//!    the transfer starts from zero.
//! 3. If the server answers a range request with anything but a matching
//!    `206 Partial Content`, the offset is dropped and the full body is written
//!    from byte zero in overwrite mode.
//!
//! # Checkpoints
//!
//! The record is rewritten when the response is opened, after every
//! [`DownloadOptions::checkpoint_interval`] bytes, and whenever the transfer
//! stops early (pause, cancel, network error). Each checkpoint first flushes
//! and syncs the partial file, so the recorded byte count never runs ahead of
//! the data on disk.
//!
//! # Control
//!
//! Pause and cancel are cooperative flags on [`DownloadControl`], observed
//! between body chunks. A pause checkpoints, releases the connection and parks
//! the worker; resuming reconnects through the resume protocol without using
//! up a retry.

pub mod range;
pub mod state;

pub use state::{DownloadState, DownloadStateStore, PendingUpdate};

use crate::constants::{
    CHECKPOINT_INTERVAL_BYTES, CHUNK_SIZE, DOWNLOAD_TIMEOUT, MAX_DOWNLOAD_RETRIES,
    PAUSE_POLL_INTERVAL, RETRY_DELAY,
};
use crate::core::{Result, UpdateError};
use crate::events::{EventSink, Progress, UpdateEvent};
use crate::utils::fs::remove_file_if_exists;
use chrono::Utc;
use futures::StreamExt;
use range::{is_partial_from, range_header, total_size};
use reqwest::StatusCode;
use reqwest::header::RANGE;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter, SeekFrom};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What the transfer worker is doing, as seen by [`DownloadControl::pause_and_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Transferring or waiting on the network.
    Running,
    /// Checkpointed and waiting for resume or cancel.
    Parked,
    /// The transfer returned.
    Finished,
}

/// Cooperative pause/cancel flags shared between the caller and the worker.
#[derive(Debug)]
pub struct DownloadControl {
    paused: AtomicBool,
    canceled: AtomicBool,
    phase: watch::Sender<WorkerPhase>,
}

impl Default for DownloadControl {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadControl {
    /// Create flags for a transfer that is about to start.
    pub fn new() -> Self {
        let (phase, _) = watch::channel(WorkerPhase::Running);
        Self {
            paused: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            phase,
        }
    }

    /// Ask the worker to stop at the next chunk boundary and wait.
    pub fn pause(&self) {
        debug!("Pause requested");
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Let a paused worker continue.
    pub fn resume(&self) {
        debug!("Resume requested");
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Ask the worker to checkpoint and return without completing.
    pub fn cancel(&self) {
        debug!("Cancel requested");
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// Whether a pause is requested.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Whether a cancel is requested.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Current worker phase.
    pub fn phase(&self) -> WorkerPhase {
        *self.phase.borrow()
    }

    /// Request a pause and return once the worker has checkpointed and parked,
    /// or has finished.
    pub async fn pause_and_wait(&self) {
        self.pause();
        let mut rx = self.phase.subscribe();
        let _ = rx.wait_for(|phase| *phase != WorkerPhase::Running).await;
    }

    fn set_phase(&self, phase: WorkerPhase) {
        self.phase.send_replace(phase);
    }
}

/// Tunables for a [`Downloader`].
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Where the partial and finished file is written.
    pub target: PathBuf,
    /// Bytes between two progress events.
    pub chunk_size: usize,
    /// Bytes of new data between two checkpoints.
    pub checkpoint_interval: u64,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Fixed wait before each retry.
    pub retry_delay: Duration,
    /// Connect and per-read timeout.
    pub timeout: Duration,
}

impl DownloadOptions {
    /// Default tunables writing to `target`.
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            chunk_size: CHUNK_SIZE,
            checkpoint_interval: CHECKPOINT_INTERVAL_BYTES,
            max_retries: MAX_DOWNLOAD_RETRIES,
            retry_delay: RETRY_DELAY,
            timeout: DOWNLOAD_TIMEOUT,
        }
    }
}

/// How a transfer ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The full file is at this path and the download record is gone.
    Completed(PathBuf),
    /// Canceled; the checkpoint is kept for a later resume.
    Canceled,
}

/// How a single attempt ended.
enum AttemptEnd {
    Completed,
    Paused,
    Canceled,
}

/// Performs one transfer at a time.
pub struct Downloader {
    client: reqwest::Client,
    states: DownloadStateStore,
    events: EventSink,
    options: DownloadOptions,
}

impl Downloader {
    /// Create a downloader persisting progress through `states`.
    pub fn new(states: DownloadStateStore, events: EventSink, options: DownloadOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(options.timeout)
            .read_timeout(options.timeout)
            .user_agent(concat!("updatekit/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            states,
            events,
            options,
        })
    }

    /// Tunables in use.
    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Download `url` to the target file, resuming where possible.
    ///
    /// Transient failures are retried with a fixed delay; a cancel during the
    /// delay returns immediately. The returned error is terminal.
    pub async fn run(&self, url: &str, version: &str, control: &DownloadControl) -> Result<DownloadOutcome> {
        let _finished = PhaseGuard(control);
        let mut retries = 0;

        loop {
            if control.is_canceled() {
                return Ok(DownloadOutcome::Canceled);
            }

            match self.attempt(url, version, control).await {
                Ok(AttemptEnd::Completed) => {
                    info!("Download of {} complete", version);
                    return Ok(DownloadOutcome::Completed(self.options.target.clone()));
                }
                Ok(AttemptEnd::Canceled) => {
                    info!("Download canceled");
                    return Ok(DownloadOutcome::Canceled);
                }
                Ok(AttemptEnd::Paused) => {
                    if !wait_while_paused(control).await {
                        info!("Download canceled while paused");
                        return Ok(DownloadOutcome::Canceled);
                    }
                }
                Err(e) if e.is_transient() && retries < self.options.max_retries => {
                    retries += 1;
                    info!(
                        "Download attempt failed ({}), retry {}/{} in {:?}",
                        e, retries, self.options.max_retries, self.options.retry_delay
                    );
                    self.events.emit(UpdateEvent::Retrying {
                        attempt: retries,
                        reason: e.to_string(),
                    });
                    if !sleep_unless_canceled(control, self.options.retry_delay).await {
                        return Ok(DownloadOutcome::Canceled);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// A valid checkpoint for this URL and target, after discarding any
    /// record that cannot be resumed.
    fn resumable_state(&self, url: &str) -> Option<DownloadState> {
        let state = self.states.load_valid_download_state(Utc::now())?;
        if state.url == url && state.file_path == self.options.target {
            return Some(state);
        }

        info!("Discarding download record for {}", state.url);
        self.states.discard_download(&state);
        None
    }

    async fn attempt(&self, url: &str, version: &str, control: &DownloadControl) -> Result<AttemptEnd> {
        if control.is_paused() {
            return Ok(AttemptEnd::Paused);
        }

        let target = &self.options.target;
        let resume = self.resumable_state(url);
        let mut offset = resume.as_ref().map_or(0, |s| s.bytes_downloaded);

        if let Some(state) = &resume {
            if state.total_size > 0 && offset == state.total_size {
                info!("Partial file already holds all {} bytes", offset);
                truncate_to(target, offset).await?;
                self.finish(offset, state.total_size)?;
                return Ok(AttemptEnd::Completed);
            }
        }

        let mut request = self.client.get(url);
        if offset > 0 {
            info!("Resuming download from byte {}", offset);
            request = request.header(RANGE, range_header(offset));
        }
        let mut response = request.send().await?;

        if offset > 0 && !is_partial_from(response.status(), response.headers(), offset) {
            info!("Server did not honor the range request, restarting from the beginning");
            offset = 0;
            if response.status() != StatusCode::OK {
                response = self.client.get(url).send().await?;
            }
        }
        let response = response.error_for_status()?;

        let total = total_size(response.headers(), offset);
        let mut checkpoint = DownloadState {
            url: url.to_string(),
            version: version.to_string(),
            file_path: target.clone(),
            bytes_downloaded: offset,
            total_size: total,
            last_saved_at: Utc::now(),
        };
        // Recorded before the file is truncated to `offset`.
        self.save_checkpoint(&checkpoint);

        let file = open_target(target, offset).await?;
        let mut writer = BufWriter::with_capacity(self.options.chunk_size, file);

        if offset > 0 && total > 0 {
            self.events.emit(UpdateEvent::Progress(Progress::new(offset, total)));
        }

        let chunk_size = self.options.chunk_size.max(1) as u64;
        let mut downloaded = offset;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.checkpoint(&mut writer, &mut checkpoint, downloaded).await?;
                    return Err(e.into());
                }
            };

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| UpdateError::io(format!("writing {}", target.display()), e))?;
            let before = downloaded;
            downloaded += chunk.len() as u64;

            if downloaded / chunk_size != before / chunk_size {
                self.events.emit(UpdateEvent::Progress(Progress::new(downloaded, total)));
            }

            if downloaded - checkpoint.bytes_downloaded >= self.options.checkpoint_interval {
                self.checkpoint(&mut writer, &mut checkpoint, downloaded).await?;
            }

            if control.is_canceled() {
                self.checkpoint(&mut writer, &mut checkpoint, downloaded).await?;
                return Ok(AttemptEnd::Canceled);
            }

            if control.is_paused() {
                self.checkpoint(&mut writer, &mut checkpoint, downloaded).await?;
                info!("Download paused at byte {}", downloaded);
                return Ok(AttemptEnd::Paused);
            }
        }

        flush_and_sync(&mut writer, target).await?;
        drop(writer);
        self.events.emit(UpdateEvent::Progress(Progress::new(downloaded, total)));
        self.finish(downloaded, total)?;
        Ok(AttemptEnd::Completed)
    }

    /// Clear the record, then reject a byte count that misses the total.
    ///
    /// An incomplete file is removed as well, so the next attempt starts
    /// from byte zero instead of trusting a length the server contradicted.
    fn finish(&self, downloaded: u64, total: u64) -> Result<()> {
        if let Err(e) = self.states.clear_download_state() {
            warn!("Failed to remove download record: {}", e);
        }

        if total > 0 && downloaded != total {
            if let Err(e) = remove_file_if_exists(&self.options.target) {
                warn!("Failed to remove incomplete download: {:#}", e);
            }
            return Err(UpdateError::Incomplete { downloaded, total });
        }
        Ok(())
    }

    async fn checkpoint(
        &self,
        writer: &mut BufWriter<File>,
        state: &mut DownloadState,
        downloaded: u64,
    ) -> Result<()> {
        flush_and_sync(writer, &state.file_path).await?;
        state.bytes_downloaded = downloaded;
        state.last_saved_at = Utc::now();
        self.save_checkpoint(state);
        Ok(())
    }

    fn save_checkpoint(&self, state: &DownloadState) {
        if let Err(e) = self.states.save_download_state(state) {
            warn!("Failed to save download checkpoint: {}", e);
        }
    }
}

/// Marks the worker finished however `run` returns.
struct PhaseGuard<'a>(&'a DownloadControl);

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.set_phase(WorkerPhase::Finished);
    }
}

/// Open the target for writing at `offset`, truncating anything beyond it.
async fn open_target(path: &Path, offset: u64) -> Result<File> {
    let io_err = |e| UpdateError::io(format!("opening {}", path.display()), e);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    if offset == 0 {
        return File::create(path).await.map_err(io_err);
    }

    let mut file = OpenOptions::new().write(true).open(path).await.map_err(io_err)?;
    file.set_len(offset).await.map_err(io_err)?;
    file.seek(SeekFrom::Start(offset)).await.map_err(io_err)?;
    Ok(file)
}

async fn truncate_to(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| UpdateError::io(format!("opening {}", path.display()), e))?;
    file.set_len(len)
        .await
        .map_err(|e| UpdateError::io(format!("truncating {}", path.display()), e))
}

async fn flush_and_sync(writer: &mut BufWriter<File>, path: &Path) -> Result<()> {
    let io_err = |e| UpdateError::io(format!("flushing {}", path.display()), e);
    writer.flush().await.map_err(io_err)?;
    writer.get_ref().sync_data().await.map_err(io_err)
}

/// Park until resumed. Returns false if canceled meanwhile.
async fn wait_while_paused(control: &DownloadControl) -> bool {
    control.set_phase(WorkerPhase::Parked);
    while control.is_paused() {
        if control.is_canceled() {
            return false;
        }
        tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
    }
    control.set_phase(WorkerPhase::Running);
    !control.is_canceled()
}

/// Sleep for `delay`. Returns false as soon as a cancel is requested.
async fn sleep_unless_canceled(control: &DownloadControl, delay: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        if control.is_canceled() {
            return false;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(PAUSE_POLL_INTERVAL)).await;
    }
}
