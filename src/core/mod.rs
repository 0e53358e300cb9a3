//! Core types shared by every engine component.
//!
//! - [`UpdateError`] - the engine's error taxonomy and transient classification
//! - [`ErrorContext`] / [`user_friendly_error`] - CLI presentation of errors

pub mod error;

pub use error::{ErrorContext, UpdateError, user_friendly_error};

/// Result alias used by the engine's typed APIs.
pub type Result<T, E = UpdateError> = std::result::Result<T, E>;
