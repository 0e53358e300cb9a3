//! Command-line interface for updatekit.
//!
//! The binary is a thin caller of [`UpdateEngine`]: every subcommand builds
//! an engine from the global options, runs one operation and prints the
//! result. It is mainly useful for driving the engine by hand and for
//! scripting around an application's update records.
//!
//! # Available Commands
//!
//! - `check` - fetch the manifest (respecting the check interval unless `--force`)
//! - `download` - download an update, resuming a previous partial transfer
//! - `install` - hand a downloaded executable to the replacement helper
//! - `pending` - inspect, install or discard a deferred update
//! - `status` - show policy, last check, resumable download and pending update
//! - `config` - show or change the check policy
//! - `watch` - run the full startup sequence and keep checking in the background
//!
//! # Examples
//!
//! ```bash
//! export UPDATEKIT_MANIFEST_URL=https://example.com/hello/version.json
//! updatekit --current-version 1.1.1 check --force
//! updatekit download https://example.com/hello/hello-1.2.0 1.2.0
//! updatekit config set check_interval_hours 12
//! updatekit status
//! ```

mod check;
mod config;
mod download;
mod install;
mod pending;
mod status;
mod watch;

use crate::engine::{EngineOptions, UpdateEngine};
use crate::version_check::VersionPolicy;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Settings derived from the global flags, shared by every subcommand.
///
/// Kept separate from [`Cli`] so tests can build engines without parsing
/// arguments.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Filter directive used when `RUST_LOG` is unset. `None` keeps logging off.
    pub log_level: Option<String>,
    /// Draw progress bars.
    pub progress: bool,
    /// Record directory override.
    pub data_dir: Option<PathBuf>,
    /// Manifest location.
    pub manifest_url: Option<String>,
    /// Version reported as the running one.
    pub current_version: String,
    /// Application name, used for the default data directory.
    pub app_name: String,
    /// How manifest versions are compared.
    pub version_policy: VersionPolicy,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_level: Some("warn".to_string()),
            progress: true,
            data_dir: None,
            manifest_url: None,
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            app_name: env!("CARGO_PKG_NAME").to_string(),
            version_policy: VersionPolicy::default(),
        }
    }
}

impl CliConfig {
    /// The manifest URL, or an error telling the user how to provide one.
    pub fn manifest_url(&self) -> Result<&str> {
        self.manifest_url.as_deref().filter(|u| !u.trim().is_empty()).context(
            "No manifest URL configured. Pass --manifest-url or set UPDATEKIT_MANIFEST_URL",
        )
    }

    /// Engine wiring for these settings.
    pub fn engine_options(&self) -> Result<EngineOptions> {
        let manifest_url = self.manifest_url.clone().unwrap_or_default();
        let mut options = match &self.data_dir {
            Some(dir) => EngineOptions::new(&self.app_name, &self.current_version, manifest_url, dir),
            None => EngineOptions::for_app(&self.app_name, &self.current_version, manifest_url)?,
        };
        options.version_policy = self.version_policy;
        Ok(options)
    }

    /// Build an engine for these settings.
    pub fn engine(&self) -> Result<UpdateEngine> {
        build_engine(self.engine_options()?)
    }
}

/// Create the data directory and an engine over it.
fn build_engine(options: EngineOptions) -> Result<UpdateEngine> {
    std::fs::create_dir_all(&options.data_dir)
        .with_context(|| format!("Failed to create data directory {}", options.data_dir.display()))?;
    Ok(UpdateEngine::new(options)?)
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `level`; with neither, nothing is logged. Logs go to
/// stderr so command output stays parseable.
pub fn init_logging(level: Option<&str>) {
    let filter = match (std::env::var("RUST_LOG"), level) {
        (Ok(_), _) => EnvFilter::from_default_env(),
        (Err(_), Some(level)) => EnvFilter::new(level),
        (Err(_), None) => return,
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Client for a self-updating application's update records and downloads.
#[derive(Parser)]
#[command(
    name = "updatekit",
    about = "Check for, download and install application updates",
    version,
    long_about = "updatekit checks a JSON version manifest, downloads new executables with \
                  pause/resume support, and replaces the running executable through a detached helper."
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress logging entirely
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable progress bars
    #[arg(long, global = true)]
    no_progress: bool,

    /// Directory holding config, check, download and pending records
    #[arg(long, global = true, env = "UPDATEKIT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// URL of the version manifest
    #[arg(long, global = true, env = "UPDATEKIT_MANIFEST_URL")]
    manifest_url: Option<String>,

    /// Version to treat as the running one
    #[arg(long, global = true, default_value = env!("CARGO_PKG_VERSION"))]
    current_version: String,

    /// Application name, used for the default data directory
    #[arg(long, global = true, default_value = env!("CARGO_PKG_NAME"))]
    app_name: String,

    /// Only offer versions that are semantically newer than the running one
    #[arg(long, global = true)]
    semver: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the manifest for a new version
    Check(check::CheckCommand),

    /// Download an update, resuming a saved partial transfer
    Download(download::DownloadCommand),

    /// Replace an executable with a downloaded one
    Install(install::InstallCommand),

    /// Show, install or discard a deferred update
    Pending(pending::PendingCommand),

    /// Show update records
    Status(status::StatusCommand),

    /// Show or change the check policy
    Config(config::ConfigCommand),

    /// Run the startup sequence, then keep checking until interrupted
    Watch(watch::WatchCommand),
}

impl Cli {
    /// Execute the parsed command line.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translate the global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("warn".to_string())
        };

        CliConfig {
            log_level,
            progress: !self.no_progress,
            data_dir: self.data_dir.clone(),
            manifest_url: self.manifest_url.clone(),
            current_version: self.current_version.clone(),
            app_name: self.app_name.clone(),
            version_policy: if self.semver { VersionPolicy::Newer } else { VersionPolicy::Exact },
        }
    }

    /// Execute with explicit settings.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        init_logging(config.log_level.as_deref());

        match self.command {
            Commands::Check(cmd) => cmd.execute(&config).await,
            Commands::Download(cmd) => cmd.execute(&config).await,
            Commands::Install(cmd) => cmd.execute(&config),
            Commands::Pending(cmd) => cmd.execute(&config),
            Commands::Status(cmd) => cmd.execute(&config),
            Commands::Config(cmd) => cmd.execute(&config),
            Commands::Watch(cmd) => cmd.execute(&config).await,
        }
    }
}
