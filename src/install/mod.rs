//! Replacing the running executable.
//!
//! [`Installer::install`] hands the downloaded file to a detached
//! [`ReplacementJob`] or, when the caller declines the restart, records a
//! [`PendingUpdate`] for the next startup.
//!
//! The pending record is written before the helper starts and removed by the
//! helper only after a successful swap. A helper that gives up therefore
//! leaves the update queued, and the next startup offers it again without
//! re-downloading.

pub mod job;
pub mod launcher;

pub use job::ReplacementJob;
pub use launcher::{DetachedLauncher, JobLauncher};

use crate::core::{Result, UpdateError};
use crate::download::{DownloadStateStore, PendingUpdate};
use crate::utils::fs::file_len;
use crate::utils::platform::protected_roots;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Appended to the file name of a download whose install was deferred.
pub const STAGED_SUFFIX: &str = ".pending";

/// Asks whether the process may restart now to finish an install.
pub trait RestartPrompt: Send + Sync {
    /// `true` to restart immediately, `false` to defer to the next startup.
    fn confirm_restart(&self, version: &str) -> bool;
}

/// Prompt that always gives the same answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl RestartPrompt for FixedAnswer {
    fn confirm_restart(&self, _version: &str) -> bool {
        self.0
    }
}

/// Where the running executable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallLocation {
    /// Under a system directory; replacing it needs elevated rights.
    Installed,
    /// In a user-writable location.
    Portable,
}

impl InstallLocation {
    /// Classify `exe` against the platform's protected directories.
    pub fn detect(exe: &Path) -> Self {
        Self::detect_with(exe, &protected_roots())
    }

    /// Classify `exe` against an explicit list of protected directories.
    pub fn detect_with(exe: &Path, protected: &[PathBuf]) -> Self {
        if protected.iter().any(|root| exe.starts_with(root)) {
            Self::Installed
        } else {
            Self::Portable
        }
    }

    /// Whether the helper must run with administrator rights.
    pub const fn requires_elevation(self) -> bool {
        matches!(self, Self::Installed)
    }
}

/// Result of a successful [`Installer::install`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The restart was declined; a pending update was recorded.
    Deferred,
    /// The helper is running. The caller should exit so it can finish.
    HelperLaunched {
        /// Helper script path
        script: PathBuf,
        /// Mechanism that was used
        location: InstallLocation,
    },
}

/// Installs downloaded executables.
pub struct Installer {
    states: DownloadStateStore,
    launcher: Arc<dyn JobLauncher>,
    script_dir: PathBuf,
    relaunch: bool,
}

impl Installer {
    /// Create an installer writing helper scripts into `script_dir`.
    pub fn new(states: DownloadStateStore, launcher: Arc<dyn JobLauncher>, script_dir: impl Into<PathBuf>) -> Self {
        Self {
            states,
            launcher,
            script_dir: script_dir.into(),
            relaunch: true,
        }
    }

    /// Whether the helper starts the new executable after the swap.
    #[must_use]
    pub const fn with_relaunch(mut self, relaunch: bool) -> Self {
        self.relaunch = relaunch;
        self
    }

    /// Replace `current_exe` with `new_file`.
    ///
    /// With `ask_permission`, a declined `prompt` moves `new_file` to
    /// `<name>.pending`, records a pending update for it and returns
    /// [`InstallOutcome::Deferred`]. Otherwise the replacement helper is
    /// started. Any error leaves `current_exe` and the download in place.
    pub fn install(
        &self,
        new_file: &Path,
        current_exe: &Path,
        version: &str,
        ask_permission: bool,
        prompt: &dyn RestartPrompt,
    ) -> Result<InstallOutcome> {
        let len = match file_len(new_file) {
            Some(len) if len > 0 => len,
            _ => {
                return Err(UpdateError::Install(format!(
                    "downloaded file {} is missing or empty",
                    new_file.display()
                )));
            }
        };

        let pending_for = |path: &Path| PendingUpdate {
            new_exe_path: path.to_path_buf(),
            current_exe_path: current_exe.to_path_buf(),
            version: version.to_string(),
            queued_at: Utc::now(),
            expected_len: Some(len),
        };

        if ask_permission && !prompt.confirm_restart(version) {
            let staged = stage_for_later(new_file)?;
            if let Err(e) = self.states.save_pending(&pending_for(&staged)) {
                if staged != new_file {
                    if let Err(undo) = std::fs::rename(&staged, new_file) {
                        warn!("Failed to move {} back: {}", staged.display(), undo);
                    }
                }
                return Err(e);
            }
            return Ok(InstallOutcome::Deferred);
        }

        let pending = pending_for(new_file);

        let location = InstallLocation::detect(current_exe);
        info!(
            "Installing {} over {} ({:?})",
            version,
            current_exe.display(),
            location
        );
        preflight(current_exe, location)?;

        if let Err(e) = self.states.save_pending(&pending) {
            warn!("Failed to record pending update before install: {}", e);
        }

        let mut job = ReplacementJob::new(new_file.to_path_buf(), current_exe.to_path_buf(), version);
        job.pending_record = self.states.pending_record_path();
        // An elevated helper would relaunch the app with elevated rights.
        job.relaunch = self.relaunch && (cfg!(windows) || !location.requires_elevation());

        let script = job.write_script(&self.script_dir)?;
        if let Err(e) = self.launcher.launch(&script, location.requires_elevation()) {
            if let Err(cleanup) = std::fs::remove_file(&script) {
                warn!("Failed to remove helper script {}: {}", script.display(), cleanup);
            }
            return Err(e);
        }

        Ok(InstallOutcome::HelperLaunched { script, location })
    }
}

/// Checks that can fail before anything is handed to the helper.
fn preflight(current_exe: &Path, location: InstallLocation) -> Result<()> {
    let Some(dir) = current_exe.parent().filter(|d| d.is_dir()) else {
        return Err(UpdateError::Install(format!(
            "install directory of {} does not exist",
            current_exe.display()
        )));
    };

    if location.requires_elevation() {
        return Ok(());
    }

    let probe = dir.join(format!(".updatekit-probe-{}", std::process::id()));
    std::fs::write(&probe, b"")
        .map_err(|e| UpdateError::Install(format!("no write access to {}: {e}", dir.display())))?;
    if let Err(e) = std::fs::remove_file(&probe) {
        debug!("Failed to remove write probe {}: {}", probe.display(), e);
    }
    Ok(())
}

/// Move a deferred download to its own file.
///
/// The downloader reuses one target path, so a later transfer would otherwise
/// truncate the executable the pending record points at.
fn stage_for_later(new_file: &Path) -> Result<PathBuf> {
    let name = new_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.ends_with(STAGED_SUFFIX) {
        return Ok(new_file.to_path_buf());
    }

    let staged = new_file.with_file_name(format!("{name}{STAGED_SUFFIX}"));
    std::fs::rename(new_file, &staged)
        .map_err(|e| UpdateError::io(format!("moving {} aside", new_file.display()), e))?;
    debug!("Staged deferred update at {}", staged.display());
    Ok(staged)
}
