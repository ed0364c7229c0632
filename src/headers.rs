//! Header lookup on the raw bytes of the client's first read.
//!
//! Lookups are literal: `"<name>: "` is searched anywhere in the buffer, the
//! first occurrence wins, and the value runs up to the next CRLF. A value
//! with no terminating CRLF is treated as absent.

use std::borrow::Cow;

pub const REAL_HOST: &str = "X-Real-Host";
pub const PASSWORD: &str = "X-Pass";
pub const SPLIT: &str = "X-Split";
pub const WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";

pub const UPGRADE_MARKER: &[u8] = b"Upgrade: websocket";

const CRLF: &[u8] = b"\r\n";

/// The bytes a client sent before any response was written.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    raw: Vec<u8>,
}

impl IncomingRequest {
    #[must_use]
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        Self { raw: raw.into() }
    }

    #[must_use]
    pub fn contains(&self, marker: &[u8]) -> bool {
        find(&self.raw, marker, 0).is_some()
    }

    /// Raw value bytes of `name`, if present and CRLF-terminated.
    #[must_use]
    pub fn header_bytes(&self, name: &str) -> Option<&[u8]> {
        let mut marker = Vec::with_capacity(name.len() + 2);
        marker.extend_from_slice(name.as_bytes());
        marker.extend_from_slice(b": ");

        let start = find(&self.raw, &marker, 0)? + marker.len();
        let end = find(&self.raw, CRLF, start)?;
        Some(&self.raw[start..end])
    }

    /// Value of `name` decoded as UTF-8, invalid sequences replaced.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        self.header_bytes(name).map(String::from_utf8_lossy)
    }

    /// Like [`Self::header`] but an empty value counts as absent.
    #[must_use]
    pub fn non_empty_header(&self, name: &str) -> Option<Cow<'_, str>> {
        self.header(name).filter(|value| !value.is_empty())
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
