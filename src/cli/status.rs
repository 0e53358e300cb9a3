//! `updatekit status`

use super::CliConfig;
use crate::config::ConfigKey;
use anyhow::Result;
use chrono::Utc;
use clap::Args;
use colored::Colorize;

/// Show the update records.
#[derive(Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub fn execute(self, config: &CliConfig) -> Result<()> {
        let engine = config.engine()?;
        let options = engine.options();
        let policy = engine.config();

        println!("{}", "Update status".bold());
        println!("  Current version: {}", options.current_version);
        println!(
            "  Manifest:        {}",
            config.manifest_url.as_deref().unwrap_or("(not configured)")
        );
        println!("  Data directory:  {}", options.data_dir.display());

        println!("\n{}", "Policy".bold());
        for key in ConfigKey::ALL {
            println!("  {:<22} {}", key.as_str(), policy.get(key));
        }

        println!("\n{}", "Last check".bold());
        match engine.scheduler().load_record() {
            Some(record) => {
                let due = engine.scheduler().is_due(&policy, Utc::now());
                println!(
                    "  {} ({})",
                    record.last_checked_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    if due { "check due".yellow() } else { "not due".green() }
                );
            }
            None => println!("  never"),
        }

        println!("\n{}", "Download".bold());
        match engine.resumable_download() {
            Some(state) => {
                let progress = state.progress();
                let amount = match (progress.percent(), progress.total) {
                    (Some(pct), Some(total)) => format!("{}/{} bytes ({pct}%)", progress.downloaded, total),
                    _ => format!("{} bytes", progress.downloaded),
                };
                println!("  {} resumable: {}", state.version.cyan(), amount);
                println!("  {}", state.url.dimmed());
            }
            None => println!("  none"),
        }

        println!("\n{}", "Pending install".bold());
        match engine.pending_update() {
            Some(pending) => println!(
                "  {} from {}",
                pending.version.cyan(),
                pending.new_exe_path.display()
            ),
            None => println!("  none"),
        }
        Ok(())
    }
}
