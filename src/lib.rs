//! Tunnel Relay
//!
//! A TCP tunnel front-end. Clients open a connection with either a WebSocket
//! upgrade request or an HTTP CONNECT-style request naming a backend in the
//! `X-Real-Host` header; after the handshake response, bytes are relayed
//! unchanged between the client and the backend until either side closes or
//! the tunnel goes idle.

pub mod auth;
pub mod config;
pub mod error;
pub mod handshake;
pub mod headers;
pub mod proxy;
pub mod registry;
pub mod relay;
pub mod security;
pub mod server;
pub mod stream;
pub mod target;
pub mod tls;

// Re-export commonly used types and functions
pub use auth::Authorizer;
pub use config::{Config, ConfigFile, TlsConfig, TunnelConfig, load_config};
pub use error::TunnelError;
pub use handshake::{Frontend, accept_key};
pub use headers::IncomingRequest;
pub use proxy::{TunnelConnection, TunnelResult, handle_connection};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use relay::{RelaySettings, RelayStats, Side, relay};
pub use security::ClientFilter;
pub use server::{Server, ServerHandle};
pub use stream::ClientStream;
pub use target::Destination;
pub use tls::build_acceptor;
