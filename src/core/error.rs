//! Error handling for the update engine
//!
//! The engine distinguishes failures by how they are recovered, not by where
//! they happen:
//!
//! - **Transient network** ([`UpdateError::Network`], [`UpdateError::Timeout`]):
//!   retried automatically by the downloader, then surfaced as terminal.
//! - **Integrity** ([`UpdateError::Incomplete`]): the transfer ended but the byte
//!   count does not match the declared total.
//! - **Persistence** ([`UpdateError::Serialization`], [`UpdateError::Io`]): record
//!   stores recover from these by falling back to defaults; they only reach the
//!   caller from explicit save operations.
//! - **Install-time** ([`UpdateError::Install`]): the executable could not be
//!   prepared for replacement; the original binary is left untouched.
//!
//! Nothing in this module terminates the process. The CLI turns errors into an
//! [`ErrorContext`] and decides the exit code itself.

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for update engine operations.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Connection refused/reset, DNS failure or a body stream that broke mid-transfer.
    #[error("Connection error: {0}")]
    Network(String),

    /// A request did not complete within its deadline.
    #[error("Connection timeout")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Numeric HTTP status code
        status: u16,
        /// URL that produced the status
        url: String,
    },

    /// Any other HTTP client failure (invalid URL, redirect loop, builder error).
    #[error("Request failed: {0}")]
    Request(String),

    /// The manifest body was not the expected JSON document.
    #[error("Invalid manifest: {0}")]
    Manifest(String),

    /// Local file-system failure.
    #[error("I/O error while {operation}: {source}")]
    Io {
        /// What the engine was doing when the error occurred
        operation: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A persisted record could not be encoded or decoded.
    #[error("Failed to serialize record '{record}': {reason}")]
    Serialization {
        /// Record file name
        record: String,
        /// Parser or encoder message
        reason: String,
    },

    /// The transfer finished with fewer (or more) bytes than the server declared.
    #[error("Download incomplete: {downloaded}/{total} bytes")]
    Incomplete {
        /// Bytes present in the target file
        downloaded: u64,
        /// Total size declared by the server
        total: u64,
    },

    /// `start_download` was called while another transfer was running.
    #[error("A download is already in progress")]
    AlreadyDownloading,

    /// A pause/resume/cancel request arrived with no transfer running.
    #[error("No download is in progress")]
    NoActiveDownload,

    /// The executable could not be handed to the replacement helper.
    #[error("Install failed: {0}")]
    Install(String),

    /// `config set` named a key that does not exist.
    #[error("Unknown config key '{0}'")]
    UnknownConfigKey(String),

    /// `config set` supplied a value that does not parse for its key.
    #[error("Invalid value '{value}' for config key '{key}'")]
    InvalidConfigValue {
        /// Key being updated
        key: String,
        /// Rejected value
        value: String,
    },

    /// No platform data directory could be resolved.
    #[error("Could not determine the application data directory")]
    DataDirUnavailable,

    /// A background task panicked or was aborted.
    #[error("Background task failed: {0}")]
    Join(String),
}

impl UpdateError {
    /// Build an [`UpdateError::Io`] tagged with the operation that failed.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Whether the downloader should retry after this error.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if let Some(status) = err.status() {
            return Self::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(ToString::to_string).unwrap_or_default(),
            };
        }
        if err.is_connect() || err.is_body() || err.is_request() {
            return Self::Network(root_cause(&err));
        }
        Self::Request(root_cause(&err))
    }
}

impl From<std::io::Error> for UpdateError {
    fn from(err: std::io::Error) -> Self {
        Self::io("accessing the file system", err)
    }
}

impl From<tokio::task::JoinError> for UpdateError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

/// Innermost message of an error chain. reqwest wraps hyper wraps io, and the
/// io message ("connection reset by peer") is what users can act on.
fn root_cause(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = err;
    while let Some(next) = current.source() {
        current = next;
    }
    current.to_string()
}

/// An error paired with user-facing details and a suggestion.
#[derive(Debug)]
pub struct ErrorContext {
    /// Rendered error message
    pub message: String,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a context with no suggestion or details.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the context to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.message);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into a user-friendly [`ErrorContext`].
///
/// Walks the anyhow chain looking for an [`UpdateError`] and attaches a
/// suggestion that matches its recovery class.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let message = format!("{error:#}");
    let Some(update_error) = error.chain().find_map(|e| e.downcast_ref::<UpdateError>()) else {
        return ErrorContext::new(message);
    };

    match update_error {
        UpdateError::Network(_) | UpdateError::Timeout => ErrorContext::new(message)
            .with_suggestion("Check your network connection and run the command again")
            .with_details("Interrupted downloads resume from the last checkpoint"),
        UpdateError::HttpStatus { .. } | UpdateError::Manifest(_) => ErrorContext::new(message)
            .with_suggestion("Verify the manifest URL with `updatekit status`"),
        UpdateError::Incomplete { .. } => ErrorContext::new(message)
            .with_suggestion("Run the download again; the server closed the transfer early"),
        UpdateError::Install(_) => ErrorContext::new(message)
            .with_suggestion("The downloaded file was kept; retry with `updatekit pending --install`")
            .with_details("The running executable was not modified"),
        UpdateError::UnknownConfigKey(_) | UpdateError::InvalidConfigValue { .. } => {
            ErrorContext::new(message).with_suggestion(
                "Valid keys: auto_check_enabled, check_interval_hours, background_check, notify_on_available",
            )
        }
        UpdateError::DataDirUnavailable => ErrorContext::new(message)
            .with_suggestion("Set UPDATEKIT_DATA_DIR to a writable directory"),
        _ => ErrorContext::new(message),
    }
}
