//! Terminal progress indicators for the CLI.
//!
//! Bars are hidden with `--no-progress` or when `UPDATEKIT_NO_PROGRESS` is
//! set, so scripted runs get plain line output.

use crate::events::Progress;
use indicatif::{ProgressBar as IndicatifBar, ProgressStyle as IndicatifStyle};
use std::time::Duration;

/// Environment variable that disables animated output.
pub const NO_PROGRESS_ENV: &str = "UPDATEKIT_NO_PROGRESS";

/// Whether progress output is turned off for this process.
pub fn is_progress_disabled() -> bool {
    std::env::var_os(NO_PROGRESS_ENV).is_some_and(|v| !v.is_empty() && v != "0")
}

/// Byte-oriented bar fed from [`Progress`] events.
///
/// Starts as a spinner and switches to a bar once the total size is known.
#[derive(Clone)]
pub struct DownloadBar {
    inner: IndicatifBar,
}

impl DownloadBar {
    /// A bar labelled with `prefix`. Hidden unless `enabled` and not
    /// disabled through the environment.
    pub fn new(prefix: impl Into<String>, enabled: bool) -> Self {
        let inner = if !enabled || is_progress_disabled() {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new_spinner();
            bar.set_style(spinner_style());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        inner.set_prefix(prefix.into());
        Self { inner }
    }

    /// Move the bar to `progress`.
    pub fn update(&self, progress: Progress) {
        if let Some(total) = progress.total {
            if self.inner.length() != Some(total) {
                self.inner.set_length(total);
                self.inner.set_style(download_style());
            }
        }
        self.inner.set_position(progress.downloaded);
    }

    /// Show a transient status line next to the bar.
    pub fn set_message(&self, msg: impl Into<String>) {
        self.inner.set_message(msg.into());
    }

    /// Print a line above the bar without tearing it.
    pub fn println(&self, msg: impl AsRef<str>) {
        if self.inner.is_hidden() {
            println!("{}", msg.as_ref());
        } else {
            self.inner.println(msg.as_ref());
        }
    }

    /// Stop the bar and leave `msg` in its place.
    pub fn finish_with_message(&self, msg: impl Into<String>) {
        self.inner.finish_with_message(msg.into());
    }

    /// Remove the bar from the terminal.
    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }

    /// Whether the bar draws anything.
    pub fn is_hidden(&self) -> bool {
        self.inner.is_hidden()
    }
}

fn download_style() -> IndicatifStyle {
    IndicatifStyle::default_bar()
        .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")
        .map(|s| s.progress_chars("━╸━"))
        .unwrap_or_else(|_| IndicatifStyle::default_bar())
}

fn spinner_style() -> IndicatifStyle {
    IndicatifStyle::default_spinner()
        .template("{prefix:.bold} {spinner:.cyan} {bytes} {msg}")
        .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
        .unwrap_or_else(|_| IndicatifStyle::default_spinner())
}
