//! `updatekit install`

use super::{CliConfig, build_engine};
use crate::install::{InstallOutcome, RestartPrompt};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// Replace an executable with a downloaded one.
///
/// Without `--yes` the user is asked whether to restart now; declining
/// records a pending update that `updatekit pending --install` (or the next
/// `watch`) picks up.
#[derive(Args)]
pub struct InstallCommand {
    /// Downloaded executable
    file: PathBuf,

    /// Version of the downloaded executable
    version: String,

    /// Install without asking
    #[arg(short, long)]
    yes: bool,

    /// Executable to replace instead of this binary
    #[arg(long)]
    target: Option<PathBuf>,
}

impl InstallCommand {
    pub fn execute(self, config: &CliConfig) -> Result<()> {
        let mut options = config.engine_options()?;
        if let Some(target) = self.target {
            options.current_exe = Some(target);
        }
        let engine = build_engine(options)?;

        let outcome = engine
            .install_ready(&self.file, &self.version, !self.yes, &StdinPrompt)
            .with_context(|| format!("Failed to install {}", self.version))?;
        report_install(&self.version, &outcome);
        Ok(())
    }
}

pub(super) fn report_install(version: &str, outcome: &InstallOutcome) {
    match outcome {
        InstallOutcome::Deferred => {
            println!("{} Update {} will be offered at next start", "⏸".yellow(), version);
        }
        InstallOutcome::HelperLaunched { script, location } => {
            println!(
                "{} Installing {} via {} ({:?} location)",
                "✓".green(),
                version,
                script.display(),
                location
            );
            println!("  The replacement completes after this process exits.");
        }
    }
}

/// Asks on the terminal; anything but an explicit yes defers.
pub(super) struct StdinPrompt;

impl RestartPrompt for StdinPrompt {
    fn confirm_restart(&self, version: &str) -> bool {
        print!("Install {version} and restart now? [y/N] ");
        let _ = std::io::stdout().flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        is_yes(&answer)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
