//! `updatekit config`

use super::CliConfig;
use crate::config::ConfigKey;
use crate::constants::CONFIG_RECORD;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

/// Show or change the check policy.
#[derive(Args)]
pub struct ConfigCommand {
    /// Operation to perform; defaults to `show`
    #[command(subcommand)]
    command: Option<ConfigSubcommands>,
}

#[derive(Subcommand)]
enum ConfigSubcommands {
    /// Print every policy key with its value
    Show,

    /// Change one policy key
    ///
    /// Booleans accept true/false, yes/no, on/off and 1/0.
    /// `check_interval_hours` must be between 1 and 720.
    Set {
        /// Key name, e.g. `check_interval_hours`
        key: String,

        /// New value
        value: String,
    },

    /// Print the location of the config record
    Path,
}

impl ConfigCommand {
    pub fn execute(self, config: &CliConfig) -> Result<()> {
        let engine = config.engine()?;

        match self.command {
            Some(ConfigSubcommands::Show) | None => {
                let current = engine.config();
                for key in ConfigKey::ALL {
                    println!("{} = {}", key.as_str().bold(), current.get(key));
                }
            }
            Some(ConfigSubcommands::Set { key, value }) => {
                let key: ConfigKey = key.parse()?;
                let updated = engine
                    .config_store()
                    .update(key, &value)
                    .with_context(|| format!("Failed to set {key}"))?;
                println!("{} {} = {}", "✓".green(), key, updated.get(key));
            }
            Some(ConfigSubcommands::Path) => {
                println!("{}", engine.options().data_dir.join(CONFIG_RECORD).display());
            }
        }
        Ok(())
    }
}
