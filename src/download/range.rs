//! HTTP byte-range helpers.

use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderMap};

/// A parsed `Content-Range: bytes <start>-<end>/<total>` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte in the body.
    pub start: u64,
    /// Last byte in the body, inclusive.
    pub end: u64,
    /// Size of the complete resource, `None` for `*`.
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parse a header value. Unsatisfied ranges (`bytes */N`) yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (span, total) = rest.split_once('/')?;
        let (start, end) = span.trim().split_once('-')?;

        let start = start.trim().parse().ok()?;
        let end = end.trim().parse().ok()?;
        if end < start {
            return None;
        }

        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse().ok()?),
        };

        Some(Self { start, end, total })
    }
}

/// `Range` request header value asking for everything from `offset`.
pub fn range_header(offset: u64) -> String {
    format!("bytes={offset}-")
}

/// Whether the server honored a range request starting at `offset`.
///
/// Only a 206 whose body actually starts at `offset` counts. A 206 for some
/// other range is treated like a full response.
pub fn is_partial_from(status: StatusCode, headers: &HeaderMap, offset: u64) -> bool {
    if status != StatusCode::PARTIAL_CONTENT {
        return false;
    }
    content_range(headers).is_some_and(|range| range.start == offset)
}

/// Declared size of the whole resource, 0 when unknown.
///
/// Prefers the `Content-Range` total; otherwise the body length plus the
/// number of bytes already on disk.
pub fn total_size(headers: &HeaderMap, offset: u64) -> u64 {
    if let Some(total) = content_range(headers).and_then(|r| r.total) {
        return total;
    }

    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(0, |len| len + offset)
}

fn content_range(headers: &HeaderMap) -> Option<ContentRange> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(ContentRange::parse)
}
