//! `updatekit watch`: the full startup sequence of a self-updating app.

use super::CliConfig;
use super::install::{StdinPrompt, report_install};
use crate::engine::UpdateEngine;
use crate::events::UpdateEvent;
use crate::install::{InstallOutcome, RestartPrompt};
use crate::utils::progress::DownloadBar;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tokio::sync::broadcast;
use tracing::debug;

/// Run the startup sequence, then keep checking until Ctrl-C.
///
/// 1. A pending update from an earlier run is installed or discarded.
/// 2. A resumable download is reported.
/// 3. A version check runs if one is due.
/// 4. The background timer keeps checking at the configured interval.
///
/// With `--auto-download`, found updates are downloaded and then offered for
/// install. Ctrl-C checkpoints any running download before exiting.
#[derive(Args)]
pub struct WatchCommand {
    /// Download updates as soon as they are found
    #[arg(long)]
    auto_download: bool,

    /// Install finished downloads and pending updates without asking
    #[arg(short, long)]
    yes: bool,
}

impl WatchCommand {
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        config.manifest_url()?;
        let engine = config.engine()?;

        if let Some(pending) = engine.pending_update() {
            if self.yes || ask(&StdinPrompt, &pending.version) {
                if let Some(outcome) = engine.install_pending().context("Failed to install pending update")? {
                    report_install(&pending.version, &outcome);
                    return Ok(());
                }
            } else {
                engine.discard_pending().context("Failed to discard pending update")?;
                println!("Discarded pending update {}", pending.version);
            }
        }

        let mut events = engine.subscribe();
        let mut downloading: Option<String> = None;
        if let Some(state) = engine.resumable_download() {
            let pct = state.progress().percent().map(|p| format!(" ({p}%)")).unwrap_or_default();
            println!(
                "{} Partial download of {}: {} bytes{}",
                "⏸".yellow(),
                state.version,
                state.bytes_downloaded,
                pct
            );
            if self.auto_download {
                engine.start_download(&state.url, &state.version)?;
                downloading = Some(state.version);
            }
        }

        engine.check_now(false).await;
        let timer = engine.spawn_background_checks();
        if timer.is_none() {
            println!("{}", "Background checks are disabled".dimmed());
        }

        let bar = DownloadBar::new("Downloading", config.progress);

        loop {
            tokio::select! {
                event = events.recv() => {
                    let event = match event {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("Skipped {} events", skipped);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };

                    match event {
                        UpdateEvent::CheckComplete { success, message } => {
                            let mark = if success { "✓".green() } else { "✗".red() };
                            bar.println(format!("{mark} {message}"));
                        }
                        UpdateEvent::UpdateFound { version, url } => {
                            if self.auto_download && downloading.is_none() {
                                engine.start_download(&url, &version)?;
                                downloading = Some(version);
                            } else if downloading.is_none() {
                                bar.println(format!("  updatekit download {url} {version}"));
                            }
                        }
                        UpdateEvent::Progress(p) => bar.update(p),
                        UpdateEvent::Retrying { attempt, reason } => {
                            bar.set_message(format!("retry {attempt}: {reason}"));
                        }
                        UpdateEvent::DownloadFailed { reason } => {
                            bar.println(format!("{} {}", "✗".red(), reason));
                            downloading = None;
                        }
                        UpdateEvent::DownloadFinished { path } => {
                            let version = downloading.take().unwrap_or_default();
                            bar.finish_and_clear();
                            let outcome = install_finished(&engine, &path, &version, self.yes)?;
                            report_install(&version, &outcome);
                            if matches!(outcome, InstallOutcome::HelperLaunched { .. }) {
                                break;
                            }
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("\nStopping");
                    break;
                }
            }
        }

        if let Some(timer) = timer {
            timer.stop();
        }
        engine.shutdown().await;
        bar.finish_and_clear();
        Ok(())
    }
}

fn ask(prompt: &dyn RestartPrompt, version: &str) -> bool {
    tokio::task::block_in_place(|| prompt.confirm_restart(version))
}

fn install_finished(
    engine: &UpdateEngine,
    path: &std::path::Path,
    version: &str,
    yes: bool,
) -> Result<InstallOutcome> {
    let outcome = tokio::task::block_in_place(|| engine.install_ready(path, version, !yes, &StdinPrompt))
        .with_context(|| format!("Failed to install {version}"))?;
    Ok(outcome)
}
