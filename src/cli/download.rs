//! `updatekit download`

use super::CliConfig;
use crate::download::DownloadOutcome;
use crate::engine::UpdateEngine;
use crate::events::UpdateEvent;
use crate::utils::progress::DownloadBar;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tokio::sync::broadcast;

/// Download an update executable.
///
/// A saved partial download of the same URL is resumed. Ctrl-C stops the
/// transfer after writing a checkpoint, so running the same command again
/// continues where it left off.
#[derive(Args)]
pub struct DownloadCommand {
    /// URL of the new executable
    url: String,

    /// Version being downloaded
    version: String,
}

impl DownloadCommand {
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let engine = config.engine()?;
        match run_download(&engine, &self.url, &self.version, config.progress).await? {
            DownloadOutcome::Completed(path) => {
                println!("{} Downloaded {} to {}", "✓".green(), self.version, path.display());
                println!(
                    "  {} updatekit install {} {}",
                    "Next:".yellow(),
                    path.display(),
                    self.version
                );
            }
            DownloadOutcome::Canceled => {
                println!("{} Download stopped; run the command again to resume", "⏸".yellow());
            }
        }
        Ok(())
    }
}

/// Run one download to its end, drawing progress and stopping cleanly on Ctrl-C.
pub(super) async fn run_download(
    engine: &UpdateEngine,
    url: &str,
    version: &str,
    progress: bool,
) -> Result<DownloadOutcome> {
    let mut events = engine.subscribe();
    let bar = DownloadBar::new(format!("Downloading {version}"), progress);

    if let Some(state) = engine.resumable_download().filter(|s| s.url == url) {
        bar.println(format!(
            "Resuming from {} bytes{}",
            state.bytes_downloaded,
            state.progress().percent().map(|p| format!(" ({p}%)")).unwrap_or_default()
        ));
    }

    engine.start_download(url, version)?;

    let result = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(UpdateEvent::Progress(p)) => bar.update(p),
                Ok(UpdateEvent::Retrying { attempt, reason }) => {
                    bar.set_message(format!("retry {attempt}: {reason}"));
                }
                Ok(UpdateEvent::DownloadFinished { .. } | UpdateEvent::DownloadFailed { .. })
                | Err(broadcast::error::RecvError::Closed) => {
                    break engine.wait_for_download().await;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                bar.set_message("saving checkpoint");
                // The worker may have ended between the signal and this call.
                let _ = engine.cancel_download();
                break engine.wait_for_download().await;
            }
        }
    };

    bar.finish_and_clear();
    let outcome = result
        .context("Download failed")?
        .unwrap_or(DownloadOutcome::Canceled);
    Ok(outcome)
}
