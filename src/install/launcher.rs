//! Starting the replacement helper outside this process's lifetime.

use crate::core::{Result, UpdateError};
use crate::utils::platform::command_exists;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::info;

/// Starts a helper script so that it keeps running after this process exits.
pub trait JobLauncher: Send + Sync {
    /// Start `script`, with administrator rights when `elevated` is set.
    fn launch(&self, script: &Path, elevated: bool) -> Result<()>;
}

/// Spawns the helper as a detached OS process.
///
/// Unix runs it with `sh` in its own process group (through `pkexec` when
/// elevation is needed). Windows runs the batch file with `cmd` without a
/// console window, or through PowerShell's `Start-Process -Verb RunAs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedLauncher;

impl JobLauncher for DetachedLauncher {
    fn launch(&self, script: &Path, elevated: bool) -> Result<()> {
        let mut command = helper_command(script, elevated)?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut command);

        command
            .spawn()
            .map_err(|e| UpdateError::Install(format!("could not start {}: {e}", script.display())))?;

        info!("Started replacement helper {}", script.display());
        Ok(())
    }
}

#[cfg(unix)]
fn helper_command(script: &Path, elevated: bool) -> Result<Command> {
    if !elevated {
        let mut command = Command::new("sh");
        command.arg(script);
        return Ok(command);
    }

    if !command_exists("pkexec") {
        return Err(UpdateError::Install(
            "the executable is in a protected location and pkexec is not available".to_string(),
        ));
    }
    let mut command = Command::new("pkexec");
    command.arg("sh").arg(script);
    Ok(command)
}

#[cfg(windows)]
fn helper_command(script: &Path, elevated: bool) -> Result<Command> {
    if !elevated {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(script);
        return Ok(command);
    }

    if !command_exists("powershell") {
        return Err(UpdateError::Install(
            "the executable is in a protected location and PowerShell is not available".to_string(),
        ));
    }
    let quoted = script.display().to_string().replace('\'', "''");
    let mut command = Command::new("powershell");
    command.args([
        "-NoProfile",
        "-NonInteractive",
        "-WindowStyle",
        "Hidden",
        "-Command",
        &format!("Start-Process -FilePath '{quoted}' -Verb RunAs -WindowStyle Hidden"),
    ]);
    Ok(command)
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(DETACHED_PROCESS | CREATE_NO_WINDOW);
}
