//! The caller-facing update engine.
//!
//! [`UpdateEngine`] wires the record stores, the version checker, the
//! downloader and the installer together and exposes the operations a
//! presentation layer needs. Results that arrive asynchronously are reported
//! as [`UpdateEvent`]s on [`UpdateEngine::subscribe`].
//!
//! A typical startup sequence:
//!
//! ```rust,no_run
//! use updatekit::engine::{EngineOptions, UpdateEngine};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let options = EngineOptions::new("Hello", "1.1.1", "https://example.com/version.json", "/tmp/hello");
//! let engine = UpdateEngine::new(options)?;
//!
//! // Pending installs are handled before anything else.
//! if let Some(pending) = engine.pending_update() {
//!     println!("update {} is waiting", pending.version);
//! }
//! if let Some(state) = engine.resumable_download() {
//!     println!("resumable download at {:?}%", state.progress().percent());
//! }
//! engine.check_now(false).await;
//! let _timer = engine.spawn_background_checks();
//! # Ok(())
//! # }
//! ```

use crate::config::{Config, ConfigStore};
use crate::core::{Result, UpdateError};
use crate::download::{
    DownloadControl, DownloadOptions, DownloadOutcome, DownloadState, DownloadStateStore, Downloader,
    PendingUpdate,
};
use crate::events::{EventSink, UpdateEvent};
use crate::install::{DetachedLauncher, FixedAnswer, InstallOutcome, Installer, JobLauncher, RestartPrompt};
use crate::schedule::{BackgroundChecker, CheckScheduler};
use crate::store::{FsStore, RecordStore};
use crate::utils::fs::remove_file_if_exists;
use crate::utils::platform::{data_dir, exe_suffix};
use crate::version_check::{CheckOutcome, VersionChecker, VersionPolicy};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Status line for a scheduled check that was not due.
pub const SKIPPED_MESSAGE: &str = "Skipped - too soon since last check";

/// Wiring for an [`UpdateEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Application name, used for the data directory and download file name.
    pub app_name: String,
    /// Version of the running executable.
    pub current_version: String,
    /// Location of the version manifest.
    pub manifest_url: String,
    /// Process-private directory holding every record.
    pub data_dir: PathBuf,
    /// How manifest versions are compared.
    pub version_policy: VersionPolicy,
    /// Downloader tunables.
    pub download: DownloadOptions,
    /// Executable to replace; defaults to the running one.
    pub current_exe: Option<PathBuf>,
    /// Whether the helper relaunches the new executable.
    pub relaunch: bool,
}

impl EngineOptions {
    /// Options with defaults, storing records under `data_dir`.
    pub fn new(
        app_name: impl Into<String>,
        current_version: impl Into<String>,
        manifest_url: impl Into<String>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        let app_name = app_name.into();
        let data_dir = data_dir.into();
        let target = data_dir.join(format!("{}_new{}", app_name.to_lowercase(), exe_suffix()));

        Self {
            app_name,
            current_version: current_version.into(),
            manifest_url: manifest_url.into(),
            data_dir,
            version_policy: VersionPolicy::default(),
            download: DownloadOptions::new(target),
            current_exe: None,
            relaunch: true,
        }
    }

    /// Options storing records in the platform data directory for `app_name`.
    pub fn for_app(
        app_name: impl Into<String>,
        current_version: impl Into<String>,
        manifest_url: impl Into<String>,
    ) -> Result<Self> {
        let app_name = app_name.into();
        let dir = data_dir(&app_name)?;
        Ok(Self::new(app_name, current_version, manifest_url, dir))
    }
}

/// Caller-facing update API.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct UpdateEngine {
    inner: Arc<Inner>,
}

struct Inner {
    options: EngineOptions,
    configs: ConfigStore,
    scheduler: CheckScheduler,
    checker: VersionChecker,
    states: DownloadStateStore,
    downloader: Arc<Downloader>,
    installer: Installer,
    events: EventSink,
    active: Mutex<Option<ActiveDownload>>,
}

struct ActiveDownload {
    control: Arc<DownloadControl>,
    handle: JoinHandle<Result<DownloadOutcome>>,
}

impl UpdateEngine {
    /// Engine with file-backed records and a detached replacement helper.
    pub fn new(options: EngineOptions) -> Result<Self> {
        let store = Arc::new(FsStore::new(&options.data_dir));
        Self::with_parts(options, store, Arc::new(DetachedLauncher))
    }

    /// Engine with injected record storage and helper launcher.
    pub fn with_parts(
        options: EngineOptions,
        store: Arc<dyn RecordStore>,
        launcher: Arc<dyn JobLauncher>,
    ) -> Result<Self> {
        let events = EventSink::default();
        let states = DownloadStateStore::new(store.clone());
        let checker = VersionChecker::new(options.manifest_url.clone(), options.version_policy)?;
        let downloader = Downloader::new(states.clone(), events.clone(), options.download.clone())?;
        let installer =
            Installer::new(states.clone(), launcher, options.data_dir.clone()).with_relaunch(options.relaunch);

        Ok(Self {
            inner: Arc::new(Inner {
                configs: ConfigStore::new(store.clone()),
                scheduler: CheckScheduler::new(store),
                checker,
                states,
                downloader: Arc::new(downloader),
                installer,
                events,
                active: Mutex::new(None),
                options,
            }),
        })
    }

    /// Wiring in use.
    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    /// Receive engine events from now on.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<UpdateEvent> {
        self.inner.events.subscribe()
    }

    /// Policy record store.
    pub fn config_store(&self) -> &ConfigStore {
        &self.inner.configs
    }

    /// Current policy.
    pub fn config(&self) -> Config {
        self.inner.configs.load()
    }

    /// Last-check record store.
    pub fn scheduler(&self) -> &CheckScheduler {
        &self.inner.scheduler
    }

    /// Run a version check.
    ///
    /// Without `force` the check is gated by [`crate::schedule::should_check`];
    /// a skipped check reports `None`. A completed attempt, successful or
    /// not, updates the last-check record.
    pub async fn check_now(&self, force: bool) -> Option<CheckOutcome> {
        let inner = &self.inner;
        let config = inner.configs.load();

        if !force && !inner.scheduler.is_due(&config, Utc::now()) {
            debug!("Version check not due");
            inner.events.emit(UpdateEvent::CheckComplete {
                success: true,
                message: SKIPPED_MESSAGE.to_string(),
            });
            return None;
        }

        let outcome = inner.checker.check(&inner.options.current_version).await;

        if let Err(e) = inner.scheduler.record_checked(Utc::now()).await {
            warn!("Failed to record check time: {}", e);
        }

        if let CheckOutcome::UpdateAvailable { version, url } = &outcome {
            inner.events.emit(UpdateEvent::UpdateFound {
                version: version.clone(),
                url: url.clone(),
            });
        }
        inner.events.emit(UpdateEvent::CheckComplete {
            success: outcome.is_success(),
            message: outcome.message(),
        });

        Some(outcome)
    }

    /// A timer-driven check, honoring `background_check`.
    pub async fn scheduled_check(&self) -> Option<CheckOutcome> {
        if !self.config().background_check {
            debug!("Background checks disabled");
            return None;
        }
        self.check_now(false).await
    }

    /// Start the periodic check timer if `background_check` is enabled.
    pub fn spawn_background_checks(&self) -> Option<BackgroundChecker> {
        let config = self.config();
        if !config.background_check {
            return None;
        }

        let period = config
            .check_interval()
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(3600));
        info!("Background checks every {} hours", config.check_interval_hours);

        let engine = self.clone();
        Some(BackgroundChecker::spawn(period, move || {
            let engine = engine.clone();
            async move {
                engine.scheduled_check().await;
            }
        }))
    }

    /// Start downloading `url` in the background.
    ///
    /// Only one download runs at a time. Completion is reported with
    /// [`UpdateEvent::DownloadFinished`] or [`UpdateEvent::DownloadFailed`];
    /// a cancel reports neither.
    pub fn start_download(&self, url: &str, version: &str) -> Result<()> {
        let mut active = self.lock_active()?;
        if active.as_ref().is_some_and(|a| !a.handle.is_finished()) {
            return Err(UpdateError::AlreadyDownloading);
        }

        let control = Arc::new(DownloadControl::new());
        let downloader = self.inner.downloader.clone();
        let events = self.inner.events.clone();
        let worker_control = control.clone();
        let url = url.to_string();
        let version = version.to_string();

        info!("Starting download of {} from {}", version, url);
        let handle = tokio::spawn(async move {
            let result = downloader.run(&url, &version, &worker_control).await;
            match &result {
                Ok(DownloadOutcome::Completed(path)) => {
                    events.emit(UpdateEvent::DownloadFinished { path: path.clone() });
                }
                Ok(DownloadOutcome::Canceled) => {}
                Err(e) => {
                    warn!("Download failed: {}", e);
                    events.emit(UpdateEvent::DownloadFailed {
                        reason: e.to_string(),
                    });
                }
            }
            result
        });

        *active = Some(ActiveDownload { control, handle });
        Ok(())
    }

    /// Whether a download task is running.
    pub fn is_downloading(&self) -> bool {
        self.lock_active()
            .map(|a| a.as_ref().is_some_and(|a| !a.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Pause the running download at the next chunk boundary.
    pub fn pause(&self) -> Result<()> {
        self.with_control(|c| c.pause())
    }

    /// Resume a paused download.
    pub fn resume(&self) -> Result<()> {
        self.with_control(|c| c.resume())
    }

    /// Cancel the running download, keeping its checkpoint.
    pub fn cancel_download(&self) -> Result<()> {
        self.with_control(|c| c.cancel())
    }

    /// Pause and return once the worker has checkpointed.
    pub async fn pause_and_wait(&self) -> Result<()> {
        let control = self.active_control()?;
        control.pause_and_wait().await;
        Ok(())
    }

    /// Wait for the running download to end. `None` if nothing was started.
    pub async fn wait_for_download(&self) -> Result<Option<DownloadOutcome>> {
        let active = self.lock_active()?.take();
        match active {
            Some(active) => Ok(Some(active.handle.await??)),
            None => Ok(None),
        }
    }

    /// Cancel any running download and wait until its checkpoint is written.
    pub async fn shutdown(&self) {
        let active = self.lock_active().ok().and_then(|mut a| a.take());
        if let Some(active) = active {
            active.control.cancel();
            match active.handle.await {
                Ok(Ok(_)) => debug!("Download worker stopped"),
                Ok(Err(e)) => debug!("Download worker ended with error: {}", e),
                Err(e) => warn!("Download worker did not stop cleanly: {}", e),
            }
        }
    }

    /// The saved download if it can still be resumed; invalid records and
    /// their partial files are removed.
    pub fn resumable_download(&self) -> Option<DownloadState> {
        self.inner.states.load_valid_download_state(Utc::now())
    }

    /// Install a finished download over the running executable.
    pub fn install_ready(
        &self,
        path: &Path,
        version: &str,
        ask_permission: bool,
        prompt: &dyn RestartPrompt,
    ) -> Result<InstallOutcome> {
        let current_exe = self.current_exe()?;
        self.inner
            .installer
            .install(path, &current_exe, version, ask_permission, prompt)
    }

    /// The update deferred at an earlier run, if its download is still intact.
    ///
    /// Call before any other startup work. A record whose downloaded file is
    /// gone or has changed length is discarded along with the file.
    pub fn pending_update(&self) -> Option<PendingUpdate> {
        let pending = self.inner.states.load_pending()?;
        if pending.is_installable() {
            return Some(pending);
        }

        info!(
            "Discarding pending update {}: {} is missing or was modified",
            pending.version,
            pending.new_exe_path.display()
        );
        if let Err(e) = remove_file_if_exists(&pending.new_exe_path) {
            warn!("Failed to remove {}: {:#}", pending.new_exe_path.display(), e);
        }
        if let Err(e) = self.inner.states.clear_pending() {
            warn!("Failed to remove pending update record: {}", e);
        }
        None
    }

    /// Install the pending update without asking.
    pub fn install_pending(&self) -> Result<Option<InstallOutcome>> {
        let Some(pending) = self.pending_update() else {
            return Ok(None);
        };

        let outcome = self.inner.installer.install(
            &pending.new_exe_path,
            &pending.current_exe_path,
            &pending.version,
            false,
            &FixedAnswer(true),
        )?;
        Ok(Some(outcome))
    }

    /// Drop the pending update and its downloaded file.
    pub fn discard_pending(&self) -> Result<()> {
        if let Some(pending) = self.inner.states.load_pending() {
            info!("Discarding pending update {}", pending.version);
            if let Err(e) = remove_file_if_exists(&pending.new_exe_path) {
                warn!("Failed to remove {}: {:#}", pending.new_exe_path.display(), e);
            }
        }
        self.inner.states.clear_pending()
    }

    fn current_exe(&self) -> Result<PathBuf> {
        match &self.inner.options.current_exe {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().map_err(|e| UpdateError::io("locating the running executable", e)),
        }
    }

    fn lock_active(&self) -> Result<std::sync::MutexGuard<'_, Option<ActiveDownload>>> {
        self.inner
            .active
            .lock()
            .map_err(|_| UpdateError::Join("download state lock poisoned".to_string()))
    }

    fn active_control(&self) -> Result<Arc<DownloadControl>> {
        self.lock_active()?
            .as_ref()
            .filter(|a| !a.handle.is_finished())
            .map(|a| a.control.clone())
            .ok_or(UpdateError::NoActiveDownload)
    }

    fn with_control(&self, f: impl FnOnce(&DownloadControl)) -> Result<()> {
        let control = self.active_control()?;
        f(&control);
        Ok(())
    }
}
