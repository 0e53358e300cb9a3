//! `updatekit check`

use super::CliConfig;
use crate::engine::SKIPPED_MESSAGE;
use crate::version_check::CheckOutcome;
use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;

/// Check the manifest for a new version.
#[derive(Args)]
pub struct CheckCommand {
    /// Check even if the interval has not elapsed or automatic checks are off
    #[arg(short, long)]
    force: bool,
}

impl CheckCommand {
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        config.manifest_url()?;
        let engine = config.engine()?;

        match engine.check_now(self.force).await {
            None => println!("{}", SKIPPED_MESSAGE.dimmed()),
            Some(CheckOutcome::CheckFailed { reason }) => bail!("Version check failed: {reason}"),
            Some(CheckOutcome::UpdateAvailable { version, url }) => {
                println!("{} {}", "↑".cyan().bold(), format!("Update found: {version}").bold());
                println!("  {} updatekit download {} {}", "Next:".yellow(), url, version);
            }
            Some(outcome) => println!("{} {}", "✓".green(), outcome.message()),
        }
        Ok(())
    }
}
