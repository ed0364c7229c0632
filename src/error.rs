use std::{io, time::Duration};

use thiserror::Error;

/// Everything that can end a single tunnel connection.
///
/// Errors never leave the task that owns the connection; the listener only
/// logs them.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("wrong or missing password")]
    Unauthorized,

    #[error("destination {0} is not allowed without a password")]
    Forbidden(String),

    #[error("failed to connect to {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no traffic for {0:?}")]
    IdleTimeout(Duration),
}

impl TunnelError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRequest(reason.into())
    }

    /// Whether the error was raised before any dial was attempted, i.e. the
    /// client gets a rejection response.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::MalformedRequest(_) | Self::Unauthorized | Self::Forbidden(_)
        )
    }
}
