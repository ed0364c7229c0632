//! The two camouflage handshakes. Neither applies any framing after the
//! response is written: the tunnel carries raw bytes.

use serde::Deserialize;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::headers::{IncomingRequest, SPLIT, UPGRADE_MARKER, WEBSOCKET_KEY};

pub const WS_BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";
pub const WS_FORBIDDEN: &[u8] = b"HTTP/1.1 403 Forbidden\r\n\r\n";

pub const CONNECT_BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request!\r\n\r\n";
pub const CONNECT_WRONG_PASS: &[u8] = b"HTTP/1.1 400 WrongPass!\r\n\r\n";
pub const CONNECT_FORBIDDEN: &[u8] = b"HTTP/1.1 403 Forbidden!\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frontend {
    /// `Upgrade: websocket` request answered with `101 Switching Protocols`.
    WebSocket,
    /// Any request answered with `200 Connection Established`.
    Connect,
}

impl Frontend {
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::WebSocket => 7000,
            Self::Connect => 900,
        }
    }

    #[must_use]
    pub const fn default_idle_polls(self) -> u32 {
        match self {
            Self::WebSocket => 300,
            Self::Connect => 60,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::Connect => "connect",
        }
    }

    /// Checks the shape of the request before anything else is looked at.
    pub fn validate(self, request: &IncomingRequest) -> Result<(), TunnelError> {
        match self {
            Self::WebSocket if !request.contains(UPGRADE_MARKER) => {
                Err(TunnelError::malformed("missing `Upgrade: websocket`"))
            }
            _ => Ok(()),
        }
    }

    /// Whether the client announced a decoy fragment that has to be read and
    /// dropped before the tunnel is set up.
    #[must_use]
    pub fn expects_split_fragment(self, request: &IncomingRequest) -> bool {
        self == Self::Connect && request.non_empty_header(SPLIT).is_some()
    }

    /// Whether only loopback or default destinations may be reached.
    #[must_use]
    pub const fn restricts_destinations(self) -> bool {
        matches!(self, Self::Connect)
    }

    /// Response that commits the client to the tunnel.
    #[must_use]
    pub fn accept_response(self, request: &IncomingRequest, config: &TunnelConfig) -> Vec<u8> {
        match self {
            Self::WebSocket => {
                let key = request.header(WEBSOCKET_KEY).unwrap_or_default();
                switching_protocols(&key, &config.server_header).into_bytes()
            }
            Self::Connect => {
                format!("HTTP/1.1 200 Connection Established\r\n{}\r\n\r\n", config.proxy_agent)
                    .into_bytes()
            }
        }
    }

    /// Bytes sent back for a rejected request. Errors after the rejection
    /// stage get no response.
    #[must_use]
    pub const fn rejection(self, error: &TunnelError) -> Option<&'static [u8]> {
        match (self, error) {
            (Self::WebSocket, TunnelError::MalformedRequest(_)) => Some(WS_BAD_REQUEST),
            (Self::WebSocket, TunnelError::Unauthorized | TunnelError::Forbidden(_)) => {
                Some(WS_FORBIDDEN)
            }
            (Self::Connect, TunnelError::MalformedRequest(_)) => Some(CONNECT_BAD_REQUEST),
            (Self::Connect, TunnelError::Unauthorized) => Some(CONNECT_WRONG_PASS),
            (Self::Connect, TunnelError::Forbidden(_)) => Some(CONNECT_FORBIDDEN),
            _ => None,
        }
    }
}

impl std::fmt::Display for Frontend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// `base64(SHA-1(key + GUID))` per RFC 6455.
#[must_use]
pub fn accept_key(key: &str) -> String {
    derive_accept_key(key.as_bytes())
}

/// An empty `server_header` leaves out both cosmetic lines.
fn switching_protocols(key: &str, server_header: &str) -> String {
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        accept_key(key)
    );
    if !server_header.is_empty() {
        response.push_str("Server: ");
        response.push_str(server_header);
        response.push_str("\r\nKeep-Alive: timeout=60\r\n");
    }
    response.push_str("\r\n");
    response
}
