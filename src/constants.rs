//! Global constants used throughout the update engine.
//!
//! Timeouts, retry parameters, transfer granularity and the names of the
//! persisted record files live here so the numbers that govern crash-safety
//! and retry behaviour are discoverable in one place.

use std::time::Duration;

/// Timeout for fetching the remote version manifest (10 seconds).
pub const MANIFEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect/read timeout for the download request (30 seconds).
///
/// This bounds how long a stalled connection can hold the transfer before it
/// is classified as a transient timeout and retried.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Write buffer size and progress granularity of a transfer (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Bytes of new data between two progress checkpoints (5 MiB).
pub const CHECKPOINT_INTERVAL_BYTES: u64 = 5 * 1024 * 1024;

/// Number of retries after the first attempt for transient network failures.
pub const MAX_DOWNLOAD_RETRIES: u32 = 3;

/// Fixed delay between download retry attempts (5 seconds).
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Poll interval while a download is paused (200ms).
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Age after which a saved download record is considered stale (24 hours).
pub const DOWNLOAD_STATE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Default hours between automatic version checks.
pub const DEFAULT_CHECK_INTERVAL_HOURS: u32 = 24;

/// Largest accepted check interval (30 days).
pub const MAX_CHECK_INTERVAL_HOURS: u32 = 720;

/// Seconds the replacement helper sleeps before touching any file.
pub const HELPER_STARTUP_DELAY_SECS: u32 = 2;

/// Seconds the replacement helper waits for the parent process to exit.
pub const HELPER_EXIT_WAIT_SECS: u32 = 30;

/// Attempts the replacement helper makes to move the new executable into place.
pub const HELPER_REPLACE_ATTEMPTS: u32 = 10;

/// Maximum characters kept from an error when reporting a check failure.
pub const CHECK_REASON_MAX_CHARS: usize = 100;

/// Record holding the user-tunable update policy.
pub const CONFIG_RECORD: &str = "config.json";

/// Record holding the timestamp of the last completed version check.
pub const LAST_CHECK_RECORD: &str = "last_check.json";

/// Record holding the state of an in-flight or resumable download.
pub const DOWNLOAD_STATE_RECORD: &str = "update_state.json";

/// Record holding an update that is downloaded but not yet deployed.
pub const PENDING_UPDATE_RECORD: &str = "pending_update.json";
