//! Integration test suite for updatekit
//!
//! End-to-end tests that drive the engine against local HTTP servers and run
//! the binary against isolated data directories.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **download**: interrupted transfers, range fallback, stale records, retries
//! - **engine**: check gating, startup sequence, pending updates
//! - **install**: helper script and deferred installs
//! - **cli**: subcommand smoke tests

// Shared test utilities (from parent tests/ directory)
#[path = "../common/mod.rs"]
mod common;

mod cli;
mod engine;
mod install;
