//! `updatekit pending`

use super::CliConfig;
use super::install::report_install;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

/// Show, install or discard the update deferred at an earlier run.
#[derive(Args)]
pub struct PendingCommand {
    /// Install the pending update now
    #[arg(long, conflicts_with = "discard")]
    install: bool,

    /// Drop the pending update and its downloaded file
    #[arg(long)]
    discard: bool,
}

impl PendingCommand {
    pub fn execute(self, config: &CliConfig) -> Result<()> {
        let engine = config.engine()?;

        let Some(pending) = engine.pending_update() else {
            println!("No pending update");
            return Ok(());
        };

        if self.discard {
            engine.discard_pending().context("Failed to discard pending update")?;
            println!("{} Discarded pending update {}", "✓".green(), pending.version);
        } else if self.install {
            if let Some(outcome) = engine.install_pending().context("Failed to install pending update")? {
                report_install(&pending.version, &outcome);
            }
        } else {
            println!("{} {}", "Pending update:".bold(), pending.version.cyan());
            println!("  Downloaded: {}", pending.new_exe_path.display());
            println!("  Replaces:   {}", pending.current_exe_path.display());
            println!("  Queued:     {}", pending.queued_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        Ok(())
    }
}
