//! Remote version manifest checks.
//!
//! The manifest is a small JSON document served over HTTPS:
//!
//! ```json
//! { "latest_version": "1.2.0", "url": "https://example.com/app-1.2.0" }
//! ```
//!
//! [`VersionChecker::check`] fetches it with a bounded timeout and compares the
//! advertised version with the running one. It has no persisted state and
//! never fails the caller: every error becomes [`CheckOutcome::CheckFailed`]
//! with a short human-readable reason.

use crate::constants::{CHECK_REASON_MAX_CHARS, MANIFEST_TIMEOUT};
use crate::core::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The remote manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Newest published version string.
    pub latest_version: String,
    /// Download location of that version's executable.
    pub url: String,
}

impl Manifest {
    /// Reject fields that cannot be used safely downstream.
    ///
    /// The version ends up in file names, log lines and the replacement
    /// helper script, so it must be non-empty and free of control characters.
    pub fn validate(&self) -> Result<()> {
        let version = self.latest_version.trim();
        if version.is_empty() || self.latest_version.chars().any(char::is_control) {
            return Err(UpdateError::Manifest(format!(
                "unusable latest_version {:?}",
                self.latest_version
            )));
        }
        if self.url.trim().is_empty() || self.url.chars().any(char::is_control) {
            return Err(UpdateError::Manifest(format!("unusable url {:?}", self.url)));
        }
        Ok(())
    }
}

/// How the advertised version is compared with the running one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionPolicy {
    /// Any difference from the running version is an update (string equality).
    #[default]
    Exact,
    /// Only a strictly greater semantic version is an update. Falls back to
    /// [`VersionPolicy::Exact`] when either side is not valid semver.
    Newer,
}

impl VersionPolicy {
    /// Whether `latest` should be offered to a process running `current`.
    pub fn is_update(self, current: &str, latest: &str) -> bool {
        match self {
            Self::Exact => latest != current,
            Self::Newer => match (parse_semver(current), parse_semver(latest)) {
                (Some(current), Some(latest)) => latest > current,
                _ => latest != current,
            },
        }
    }
}

fn parse_semver(version: &str) -> Option<semver::Version> {
    semver::Version::parse(version.trim().trim_start_matches('v')).ok()
}

/// Result of one version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The running version is current.
    UpToDate,
    /// A different (or newer, depending on policy) version is published.
    UpdateAvailable {
        /// Advertised version
        version: String,
        /// Where to download it
        url: String,
    },
    /// The manifest could not be fetched or parsed.
    CheckFailed {
        /// Short human-readable cause
        reason: String,
    },
}

impl CheckOutcome {
    /// Whether the check itself succeeded, regardless of its finding.
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::CheckFailed { .. })
    }

    /// Status line describing the outcome.
    pub fn message(&self) -> String {
        match self {
            Self::UpToDate => "Already up to date".to_string(),
            Self::UpdateAvailable { version, .. } => format!("Update found: {version}"),
            Self::CheckFailed { reason } => reason.clone(),
        }
    }
}

/// Fetches the manifest and compares versions.
#[derive(Debug, Clone)]
pub struct VersionChecker {
    client: reqwest::Client,
    manifest_url: String,
    policy: VersionPolicy,
}

impl VersionChecker {
    /// Create a checker for `manifest_url` with the default 10 second timeout.
    pub fn new(manifest_url: impl Into<String>, policy: VersionPolicy) -> Result<Self> {
        Self::with_timeout(manifest_url, policy, MANIFEST_TIMEOUT)
    }

    /// Create a checker with an explicit request timeout.
    pub fn with_timeout(
        manifest_url: impl Into<String>,
        policy: VersionPolicy,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("updatekit/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            manifest_url: manifest_url.into(),
            policy,
        })
    }

    /// URL of the manifest being checked.
    pub fn manifest_url(&self) -> &str {
        &self.manifest_url
    }

    /// Download and decode the manifest.
    pub async fn fetch_manifest(&self) -> Result<Manifest> {
        debug!("Fetching version manifest from {}", self.manifest_url);

        let response = self.client.get(&self.manifest_url).send().await?.error_for_status()?;
        let body = response.bytes().await?;

        let manifest: Manifest =
            serde_json::from_slice(&body).map_err(|e| UpdateError::Manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Compare the published version with `current_version`.
    pub async fn check(&self, current_version: &str) -> CheckOutcome {
        let manifest = match self.fetch_manifest().await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Version check failed: {}", e);
                return CheckOutcome::CheckFailed {
                    reason: failure_reason(&e),
                };
            }
        };

        if self.policy.is_update(current_version, &manifest.latest_version) {
            info!(
                "Update available: {} -> {}",
                current_version, manifest.latest_version
            );
            CheckOutcome::UpdateAvailable {
                version: manifest.latest_version,
                url: manifest.url,
            }
        } else {
            debug!("Already running {}", current_version);
            CheckOutcome::UpToDate
        }
    }
}

/// Short status text for a failed check.
///
/// The underlying error text is capped at 100 characters.
pub fn failure_reason(error: &UpdateError) -> String {
    match error {
        UpdateError::Timeout => "Connection timeout".to_string(),
        UpdateError::Network(cause) => format!("Connection error: {}", truncate(cause)),
        other => format!("Error: {}", truncate(&other.to_string())),
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(CHECK_REASON_MAX_CHARS).collect()
}
