use std::fmt;

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::TunnelError;

pub const DEFAULT_TARGET_PORT: u16 = 443;

/// Backend address a tunnel connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    /// Splits `host:port` on the first `:`. Without a `:` the port is 443.
    pub fn parse(target: &str) -> Result<Self, TunnelError> {
        let (host, port) = match target.split_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|&port| port != 0)
                    .ok_or_else(|| TunnelError::malformed(format!("invalid port in {target:?}")))?;
                (host, port)
            }
            None => (target, DEFAULT_TARGET_PORT),
        };

        if host.is_empty() {
            return Err(TunnelError::malformed(format!("missing host in {target:?}")));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Resolves and dials the destination with the platform's default
    /// connect timeout. Failures are reported, never retried.
    pub async fn connect(&self) -> Result<TcpStream, TunnelError> {
        debug!(target_addr = %self, "Attempting to connect to target server");
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|source| TunnelError::Dial {
                target: self.to_string(),
                source,
            })?;
        stream.set_nodelay(true).ok();
        Ok(stream)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
