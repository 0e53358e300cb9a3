//! Platform-specific helpers.
//!
//! Covers the few places where the update engine behaves differently per OS:
//! where records live, the executable suffix, and which directories count as
//! protected install locations.

use crate::core::UpdateError;
use std::path::PathBuf;

/// Checks if the current platform is Windows.
#[must_use]
pub const fn is_windows() -> bool {
    cfg!(windows)
}

/// Suffix appended to executable file names on this platform.
#[must_use]
pub const fn exe_suffix() -> &'static str {
    if is_windows() { ".exe" } else { "" }
}

/// Returns the process-private data directory for `app_name`.
///
/// # Platform Paths
///
/// - **Windows**: `%LOCALAPPDATA%\<app_name>`
/// - **Unix/macOS**: `~/.<app_name>`
pub fn data_dir(app_name: &str) -> Result<PathBuf, UpdateError> {
    if is_windows() {
        dirs::data_local_dir()
            .map(|d| d.join(app_name))
            .ok_or(UpdateError::DataDirUnavailable)
    } else {
        dirs::home_dir()
            .map(|h| h.join(format!(".{}", app_name.to_lowercase())))
            .ok_or(UpdateError::DataDirUnavailable)
    }
}

/// Checks if a command is available on `PATH`.
#[must_use]
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Directories whose contents require elevated rights to modify.
///
/// On Windows these come from the `ProgramFiles` environment variables; on
/// Unix they are the conventional system prefixes.
pub fn protected_roots() -> Vec<PathBuf> {
    if is_windows() {
        ["ProgramFiles", "ProgramFiles(x86)", "ProgramW6432"]
            .iter()
            .filter_map(std::env::var_os)
            .map(PathBuf::from)
            .collect()
    } else {
        ["/usr/bin", "/usr/sbin", "/usr/local/bin", "/opt", "/Applications"]
            .iter()
            .map(PathBuf::from)
            .collect()
    }
}
