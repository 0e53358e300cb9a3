//! updatekit - the update engine of a self-updating application.
//!
//! The engine checks a remote JSON manifest for a new version, downloads the
//! new executable with resume and retry, and replaces the running executable
//! through a detached helper, optionally deferring the swap to the next
//! startup.
//!
//! # Architecture Overview
//!
//! ```text
//! CheckScheduler ──gates──▶ VersionChecker ──UpdateFound──▶ caller
//!                                                             │
//!                         DownloadStateStore ◀──checkpoints── Downloader
//!                                  │                          │
//!                          PendingUpdate ◀──deferred── Installer ──▶ helper script
//! ```
//!
//! Every persisted record (config, last check, download progress, pending
//! update) is a small JSON document behind a [`store::RecordStore`], so the
//! whole engine runs against [`store::MemoryStore`] in tests.
//!
//! # Core Modules
//!
//! - [`engine`] - [`engine::UpdateEngine`], the caller-facing API
//! - [`config`] - check policy and its store
//! - [`schedule`] - last-check record, the check gate and the background timer
//! - [`version_check`] - manifest fetch and version comparison
//! - [`download`] - resumable download worker, its control handle and records
//! - [`install`] - executable replacement and the pending-update path
//! - [`events`] - notifications delivered to subscribers
//! - [`store`] - record persistence
//! - [`core`] - error types
//! - [`cli`] - the `updatekit` command-line caller
//!
//! # Startup Sequence
//!
//! 1. [`engine::UpdateEngine::pending_update`] before anything else; install
//!    or discard it.
//! 2. [`engine::UpdateEngine::resumable_download`] to show a partial download.
//! 3. [`engine::UpdateEngine::check_now`] and
//!    [`engine::UpdateEngine::spawn_background_checks`].
//! 4. On exit, [`engine::UpdateEngine::shutdown`] so a running download
//!    checkpoints.

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod download;
pub mod engine;
pub mod events;
pub mod install;
pub mod schedule;
pub mod store;
pub mod utils;
pub mod version_check;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
