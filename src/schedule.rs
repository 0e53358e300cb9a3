//! Version-check scheduling.
//!
//! [`should_check`] is the pure gate deciding whether a scheduled check is due.
//! [`CheckScheduler`] owns the persisted [`CheckRecord`] and serializes writes to
//! it. [`BackgroundChecker`] is the periodic timer that fires scheduled checks
//! without ever blocking on them.

use crate::config::Config;
use crate::constants::LAST_CHECK_RECORD;
use crate::core::Result;
use crate::store::{RecordStore, load_json, save_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// When the last version check completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    /// Completion time of the last check attempt.
    #[serde(alias = "timestamp")]
    pub last_checked_at: DateTime<Utc>,
}

/// Whether a scheduled check should run now.
///
/// Returns false when automatic checks are disabled or the last check is more
/// recent than the configured interval. No record at all counts as infinitely
/// overdue. A record timestamped in the future (the clock moved backwards) is
/// also treated as overdue so a bad timestamp cannot suppress checks forever.
pub fn should_check(config: &Config, record: Option<&CheckRecord>, now: DateTime<Utc>) -> bool {
    if !config.auto_check_enabled {
        return false;
    }

    let Some(record) = record else {
        return true;
    };

    if record.last_checked_at > now {
        return true;
    }

    now - record.last_checked_at >= config.check_interval()
}

/// Reads and writes the last-check record.
pub struct CheckScheduler {
    store: Arc<dyn RecordStore>,
    write_lock: Mutex<()>,
}

impl CheckScheduler {
    /// Create a scheduler backed by `store`.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// The persisted record, if any. Corrupt records read as absent.
    pub fn load_record(&self) -> Option<CheckRecord> {
        load_json(self.store.as_ref(), LAST_CHECK_RECORD)
    }

    /// Apply [`should_check`] against the persisted record.
    pub fn is_due(&self, config: &Config, now: DateTime<Utc>) -> bool {
        should_check(config, self.load_record().as_ref(), now)
    }

    /// Record that a check attempt completed at `now`.
    ///
    /// Writers are serialized. When a manual and a scheduled check finish
    /// concurrently the later timestamp is kept.
    pub async fn record_checked(&self, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.load_record() {
            if existing.last_checked_at >= now && existing.last_checked_at <= Utc::now() {
                debug!("Keeping newer check record {}", existing.last_checked_at);
                return Ok(());
            }
        }

        save_json(
            self.store.as_ref(),
            LAST_CHECK_RECORD,
            &CheckRecord {
                last_checked_at: now,
            },
        )
    }
}

/// Periodic timer that launches one check per tick.
///
/// A tick that fires while the previous check is still running is skipped, so
/// one timer never has two checks outstanding. The check future runs on its
/// own task and never delays the timer. Dropping the handle stops the timer;
/// a check already running is left to finish.
pub struct BackgroundChecker {
    handle: JoinHandle<()>,
}

impl BackgroundChecker {
    /// Start firing `check` every `period`, first after one full period.
    pub fn spawn<F, Fut>(period: Duration, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let in_flight = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if in_flight.swap(true, Ordering::AcqRel) {
                    debug!("Previous background check still running, skipping tick");
                    continue;
                }

                let guard = InFlightGuard(in_flight.clone());
                let fut = check();
                tokio::spawn(async move {
                    let _guard = guard;
                    fut.await;
                });
            }
        });

        Self { handle }
    }

    /// Stop the timer.
    pub fn stop(&self) {
        self.handle.abort();
    }

    /// Whether the timer task is still alive.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for BackgroundChecker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Clears the in-flight flag even if the check panics.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
