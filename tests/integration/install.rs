use crate::common::RecordingLauncher;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use updatekit::constants::PENDING_UPDATE_RECORD;
use updatekit::download::DownloadStateStore;
use updatekit::install::{FixedAnswer, InstallOutcome, Installer};
use updatekit::store::FsStore;

struct Layout {
    temp: TempDir,
    data: PathBuf,
    new_exe: PathBuf,
    target: PathBuf,
}

fn layout() -> Result<Layout> {
    let temp = TempDir::new()?;
    let data = temp.path().join("data");
    let bin = temp.path().join("bin");
    std::fs::create_dir_all(&data)?;
    std::fs::create_dir_all(&bin)?;
    let new_exe = data.join("hello_new");
    let target = bin.join("hello");
    std::fs::write(&new_exe, b"#!/bin/sh\necho 1.2.0\n")?;
    std::fs::write(&target, b"old")?;
    Ok(Layout {
        temp,
        data,
        new_exe,
        target,
    })
}

#[test]
fn test_declined_install_writes_pending_record_to_disk() -> Result<()> {
    let l = layout()?;
    let states = DownloadStateStore::new(Arc::new(FsStore::new(&l.data)));
    let launcher = Arc::new(RecordingLauncher::default());
    let installer = Installer::new(states.clone(), launcher.clone(), &l.data);

    let outcome = installer.install(&l.new_exe, &l.target, "1.2.0", true, &FixedAnswer(false))?;

    assert_eq!(outcome, InstallOutcome::Deferred);
    assert_eq!(std::fs::read(&l.target)?, b"old");
    assert!(launcher.launched.lock().unwrap().is_empty());

    let record: serde_json::Value =
        serde_json::from_slice(&std::fs::read(l.data.join(PENDING_UPDATE_RECORD))?)?;
    assert_eq!(record["version"], "1.2.0");
    let staged = l.data.join("hello_new.pending");
    assert_eq!(record["new_exe_path"], staged.display().to_string());
    assert_eq!(record["expected_len"], std::fs::metadata(&staged)?.len());
    assert!(!l.new_exe.exists());
    assert_eq!(record["current_exe_path"], l.target.display().to_string());
    assert!(record["queued_at"].is_string());
    Ok(())
}

/// The helper written by the installer swaps the executable, deletes the
/// download and the pending record, and removes itself.
#[cfg(unix)]
#[test]
fn test_helper_script_completes_swap() -> Result<()> {
    let l = layout()?;
    let states = DownloadStateStore::new(Arc::new(FsStore::new(&l.data)));
    let launcher = Arc::new(RecordingLauncher::default());
    let installer = Installer::new(states.clone(), launcher.clone(), &l.data).with_relaunch(false);

    let outcome = installer.install(&l.new_exe, &l.target, "1.2.0", false, &FixedAnswer(true))?;
    let InstallOutcome::HelperLaunched { script, .. } = outcome else {
        panic!("expected the helper to be launched");
    };
    assert!(states.load_pending().is_some());

    // Point the helper at a process that has already exited instead of this one.
    let mut exited = std::process::Command::new("true").spawn()?;
    exited.wait()?;
    let text = std::fs::read_to_string(&script)?
        .replace(&format!("PARENT={}", std::process::id()), &format!("PARENT={}", exited.id()));
    std::fs::write(&script, text)?;

    let status = std::process::Command::new("sh").arg(&script).status()?;

    assert!(status.success());
    assert_eq!(std::fs::read(&l.target)?, b"#!/bin/sh\necho 1.2.0\n");
    assert!(!l.new_exe.exists());
    assert!(states.load_pending().is_none());
    assert!(!script.exists());

    use std::os::unix::fs::PermissionsExt;
    assert_eq!(std::fs::metadata(&l.target)?.permissions().mode() & 0o777, 0o755);
    Ok(())
}

#[test]
fn test_missing_install_directory_fails_without_side_effects() -> Result<()> {
    let l = layout()?;
    let states = DownloadStateStore::new(Arc::new(FsStore::new(&l.data)));
    let launcher = Arc::new(RecordingLauncher::default());
    let installer = Installer::new(states.clone(), launcher.clone(), &l.data);
    let target = l.temp.path().join("gone").join("hello");

    let err = installer
        .install(&l.new_exe, &target, "1.2.0", false, &FixedAnswer(true))
        .unwrap_err();

    assert!(err.to_string().contains("Install failed"));
    assert!(l.new_exe.exists());
    assert!(states.load_pending().is_none());
    assert!(launcher.launched.lock().unwrap().is_empty());
    Ok(())
}
