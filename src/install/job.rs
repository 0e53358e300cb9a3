//! The deferred replacement job.
//!
//! A running executable cannot reliably overwrite itself, so the swap is done
//! by a small script that outlives this process. The script:
//!
//! 1. waits (bounded) for the parent process to exit, then a short grace delay
//! 2. tries to move the new executable into place, retrying while the old
//!    file is locked
//! 3. marks the result executable, deletes the pending-update record and the
//!    downloaded file
//! 4. relaunches the new executable and deletes itself
//!
//! When every attempt fails the script leaves the original executable, the
//! download and the pending record untouched so the next startup re-offers the
//! update.

use crate::constants::{HELPER_EXIT_WAIT_SECS, HELPER_REPLACE_ATTEMPTS, HELPER_STARTUP_DELAY_SECS};
use crate::core::{Result, UpdateError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything the helper script needs to finish an install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementJob {
    /// Downloaded executable.
    pub new_exe: PathBuf,
    /// Executable being replaced.
    pub target_exe: PathBuf,
    /// Version being installed, for the script's log line.
    pub version: String,
    /// Pending-update record to delete after a successful swap.
    pub pending_record: Option<PathBuf>,
    /// Process to wait for before touching any file.
    pub parent_pid: u32,
    /// Start the new executable once it is in place.
    pub relaunch: bool,
    /// Seconds to sleep after the parent exits.
    pub startup_delay_secs: u32,
    /// Replace attempts before giving up.
    pub attempts: u32,
}

impl ReplacementJob {
    /// A job for the current process with default timings.
    pub fn new(new_exe: PathBuf, target_exe: PathBuf, version: impl Into<String>) -> Self {
        Self {
            new_exe,
            target_exe,
            version: version.into(),
            pending_record: None,
            parent_pid: std::process::id(),
            relaunch: true,
            startup_delay_secs: HELPER_STARTUP_DELAY_SECS,
            attempts: HELPER_REPLACE_ATTEMPTS,
        }
    }

    /// File name of the helper script on this platform.
    pub const fn script_file_name() -> &'static str {
        if cfg!(windows) { "update_installer.bat" } else { "update_installer.sh" }
    }

    /// The helper script for this platform.
    pub fn render(&self) -> String {
        if cfg!(windows) { self.render_batch() } else { self.render_shell() }
    }

    /// POSIX shell rendition.
    pub fn render_shell(&self) -> String {
        let relaunch = if self.relaunch {
            "    nohup \"$TARGET\" >/dev/null 2>&1 &\n"
        } else {
            ""
        };

        format!(
            r#"#!/bin/sh
VERSION={version}
NEW={new}
TARGET={target}
PENDING={pending}
PARENT={pid}

waited=0
while kill -0 "$PARENT" 2>/dev/null && [ "$waited" -lt {exit_wait} ]; do
    sleep 1
    waited=$((waited + 1))
done
sleep {delay}

attempt=1
while [ "$attempt" -le {attempts} ]; do
    if cp -f "$NEW" "$TARGET.tmp" 2>/dev/null && chmod 755 "$TARGET.tmp" && mv -f "$TARGET.tmp" "$TARGET"; then
        rm -f "$NEW"
        if [ -n "$PENDING" ]; then rm -f "$PENDING"; fi
{relaunch}        rm -f "$0"
        exit 0
    fi
    rm -f "$TARGET.tmp"
    attempt=$((attempt + 1))
    sleep 1
done

echo "Failed to install $VERSION over $TARGET" >&2
rm -f "$0"
exit 1
"#,
            version = sh_quote_str(&self.version),
            new = sh_quote(&self.new_exe),
            target = sh_quote(&self.target_exe),
            pending = self.pending_record.as_deref().map_or_else(|| "''".to_string(), sh_quote),
            pid = self.parent_pid,
            exit_wait = HELPER_EXIT_WAIT_SECS,
            delay = self.startup_delay_secs,
            attempts = self.attempts,
            relaunch = relaunch,
        )
    }

    /// Windows batch rendition.
    pub fn render_batch(&self) -> String {
        let relaunch = if self.relaunch { "start \"\" \"%TARGET%\"\r\n" } else { "" };
        let pending = self
            .pending_record
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let script = format!(
            r#"@echo off
echo Installing version {version}...
set "NEW={new}"
set "TARGET={target}"
set "PENDING={pending}"
set /a WAITED=0

:wait_parent
if %WAITED% geq {exit_wait} goto wait_done
tasklist /FI "PID eq {pid}" 2>nul | find "{pid}" >nul
if errorlevel 1 goto wait_done
timeout /t 1 /nobreak >nul
set /a WAITED+=1
goto wait_parent

:wait_done
timeout /t {delay} /nobreak >nul
set /a ATTEMPT=0

:retry
set /a ATTEMPT+=1
copy /y "%NEW%" "%TARGET%" >nul 2>&1
if not errorlevel 1 goto replaced
if %ATTEMPT% geq {attempts} goto failed
timeout /t 1 /nobreak >nul
goto retry

:replaced
del "%NEW%" >nul 2>&1
if not "%PENDING%"=="" del "%PENDING%" >nul 2>&1
{relaunch}(goto) 2>nul & del "%~f0"

:failed
echo Failed to replace %TARGET%
(goto) 2>nul & del "%~f0"
"#,
            version = batch_safe(&self.version),
            new = self.new_exe.display(),
            target = self.target_exe.display(),
            pending = pending,
            pid = self.parent_pid,
            exit_wait = HELPER_EXIT_WAIT_SECS,
            delay = self.startup_delay_secs,
            attempts = self.attempts,
            relaunch = relaunch,
        );

        script.replace("\r\n", "\n").replace('\n', "\r\n")
    }

    /// Write the helper script into `dir` and make it executable.
    pub fn write_script(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(Self::script_file_name());
        std::fs::create_dir_all(dir)
            .map_err(|e| UpdateError::io(format!("creating {}", dir.display()), e))?;
        std::fs::write(&path, self.render())
            .map_err(|e| UpdateError::io(format!("writing {}", path.display()), e))?;
        set_executable(&path)?;
        debug!("Wrote replacement helper to {}", path.display());
        Ok(path)
    }
}

/// Single-quote a path for POSIX sh.
fn sh_quote(path: &Path) -> String {
    sh_quote_str(&path.display().to_string())
}

fn sh_quote_str(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Reduce a version to characters that are inert on a batch `echo` line.
fn batch_safe(version: &str) -> String {
    version
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_'))
        .collect()
}

/// Set executable permission on Unix platforms.
pub(crate) fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| UpdateError::io(format!("marking {} executable", path.display()), e))?;
    }
    let _ = path;
    Ok(())
}
