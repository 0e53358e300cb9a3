//! User-tunable update policy.
//!
//! The policy is a single JSON record (`config.json`) in the data directory:
//!
//! ```json
//! {
//!   "auto_check_enabled": true,
//!   "check_interval_hours": 24,
//!   "background_check": true,
//!   "notify_on_available": true
//! }
//! ```
//!
//! Every field carries a serde default, so a record written by an older build
//! (or edited by hand) loads with the missing keys filled in. [`ConfigStore::load`]
//! never fails: an absent record yields defaults, a corrupt one is logged, left
//! on disk, and read for whatever keys still decode.

use crate::constants::{CONFIG_RECORD, DEFAULT_CHECK_INTERVAL_HOURS, MAX_CHECK_INTERVAL_HOURS};
use crate::core::{Result, UpdateError};
use crate::store::{RecordStore, save_json};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Update policy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Whether scheduled checks run at all. Manual checks ignore this.
    #[serde(default = "default_true")]
    pub auto_check_enabled: bool,

    /// Minimum hours between two scheduled checks.
    ///
    /// Always within `1..=720`; out-of-range stored values are clamped on load.
    #[serde(default = "default_check_interval_hours")]
    pub check_interval_hours: u32,

    /// Whether the periodic background timer is started.
    #[serde(default = "default_true")]
    pub background_check: bool,

    /// Whether callers should surface a notification when an update is found.
    #[serde(default = "default_true")]
    pub notify_on_available: bool,
}

const fn default_true() -> bool {
    true
}

const fn default_check_interval_hours() -> u32 {
    DEFAULT_CHECK_INTERVAL_HOURS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_check_enabled: true,
            check_interval_hours: DEFAULT_CHECK_INTERVAL_HOURS,
            background_check: true,
            notify_on_available: true,
        }
    }
}

impl Config {
    /// Bring every field back into its valid range.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.check_interval_hours = self.check_interval_hours.clamp(1, MAX_CHECK_INTERVAL_HOURS);
        self
    }

    /// The check interval as a duration.
    pub fn check_interval(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.check_interval_hours))
    }

    /// Apply a textual update to a single key.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        let invalid = || UpdateError::InvalidConfigValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            ConfigKey::AutoCheckEnabled => self.auto_check_enabled = parse_bool(value).ok_or_else(invalid)?,
            ConfigKey::BackgroundCheck => self.background_check = parse_bool(value).ok_or_else(invalid)?,
            ConfigKey::NotifyOnAvailable => self.notify_on_available = parse_bool(value).ok_or_else(invalid)?,
            ConfigKey::CheckIntervalHours => {
                let hours: u32 = value.trim().parse().map_err(|_| invalid())?;
                if hours == 0 || hours > MAX_CHECK_INTERVAL_HOURS {
                    return Err(invalid());
                }
                self.check_interval_hours = hours;
            }
        }
        Ok(())
    }

    /// Current value of a key rendered as text.
    pub fn get(&self, key: ConfigKey) -> String {
        match key {
            ConfigKey::AutoCheckEnabled => self.auto_check_enabled.to_string(),
            ConfigKey::CheckIntervalHours => self.check_interval_hours.to_string(),
            ConfigKey::BackgroundCheck => self.background_check.to_string(),
            ConfigKey::NotifyOnAvailable => self.notify_on_available.to_string(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Names of the settable policy keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    /// `auto_check_enabled`
    AutoCheckEnabled,
    /// `check_interval_hours`
    CheckIntervalHours,
    /// `background_check`
    BackgroundCheck,
    /// `notify_on_available`
    NotifyOnAvailable,
}

impl ConfigKey {
    /// Every key, in display order.
    pub const ALL: [Self; 4] = [
        Self::AutoCheckEnabled,
        Self::CheckIntervalHours,
        Self::BackgroundCheck,
        Self::NotifyOnAvailable,
    ];

    /// Serialized name of the key.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AutoCheckEnabled => "auto_check_enabled",
            Self::CheckIntervalHours => "check_interval_hours",
            Self::BackgroundCheck => "background_check",
            Self::NotifyOnAvailable => "notify_on_available",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s.trim())
            .ok_or_else(|| UpdateError::UnknownConfigKey(s.to_string()))
    }
}

/// Loads and saves the policy record.
///
/// Single-writer: `update` is load-mutate-save and does not guard against a
/// concurrent writer in another process.
#[derive(Clone)]
pub struct ConfigStore {
    store: Arc<dyn RecordStore>,
}

impl ConfigStore {
    /// Create a config store backed by `store`.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Load the policy, falling back to defaults on absence or corruption.
    ///
    /// The record is never deleted. When it does not decode as a whole, every
    /// key that still decodes on its own is kept and the rest take defaults.
    pub fn load(&self) -> Config {
        let bytes = match self.store.read(CONFIG_RECORD) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("No config record, using defaults");
                return Config::default();
            }
            Err(e) => {
                warn!("Failed to read config record: {}", e);
                return Config::default();
            }
        };

        match serde_json::from_slice::<Config>(&bytes) {
            Ok(config) => config.normalized(),
            Err(e) => {
                warn!("Config record is invalid ({}), keeping the readable keys", e);
                salvage(&bytes).normalized()
            }
        }
    }

    /// Persist the policy atomically.
    pub fn save(&self, config: &Config) -> Result<()> {
        save_json(self.store.as_ref(), CONFIG_RECORD, &config.clone().normalized())
    }

    /// Load, change one key, save. Returns the saved policy.
    pub fn update(&self, key: ConfigKey, value: &str) -> Result<Config> {
        let mut config = self.load();
        config.set(key, value)?;
        self.save(&config)?;
        Ok(config)
    }
}

/// Defaults overlaid with every key of `bytes` that decodes by itself.
fn salvage(bytes: &[u8]) -> Config {
    let Ok(serde_json::Value::Object(fields)) = serde_json::from_slice(bytes) else {
        return Config::default();
    };

    let usable: serde_json::Map<String, serde_json::Value> = fields
        .into_iter()
        .filter(|(key, value)| {
            let single = serde_json::Value::Object([(key.clone(), value.clone())].into_iter().collect());
            serde_json::from_value::<Config>(single).is_ok()
        })
        .collect();

    serde_json::from_value(serde_json::Value::Object(usable)).unwrap_or_default()
}
