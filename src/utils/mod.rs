//! Cross-platform utilities used by the record stores, downloader and installer.

pub mod fs;
pub mod platform;
pub mod progress;
