//! Bidirectional copy between the client and target sockets.
//!
//! Each wait watches both sockets for readability with a fixed poll timeout.
//! Whichever side becomes readable first is drained into a buffer and the
//! bytes are written in full to the other side. A wait that times out with
//! nothing readable counts as one idle poll; any transfer resets the count.
//! The tunnel is torn down after `idle_polls` consecutive idle polls, so the
//! idle budget is `poll_interval * idle_polls`.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::config::TunnelConfig;
use crate::error::TunnelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    pub buffer_size: usize,
    pub poll_interval: Duration,
    pub idle_polls: u32,
}

impl From<&TunnelConfig> for RelaySettings {
    fn from(config: &TunnelConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            poll_interval: config.poll_interval,
            idle_polls: config.idle_polls,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Target,
}

/// How a relay that ended without error finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_target: u64,
    pub target_to_client: u64,
    /// The side whose end-of-stream stopped the relay.
    pub closed_by: Side,
}

/// Copies bytes both ways until one side reaches end-of-stream, an I/O error
/// occurs, or the idle budget runs out. The caller owns closing both sockets.
pub async fn relay<C, T>(
    client: &mut C,
    target: &mut T,
    settings: RelaySettings,
) -> Result<RelayStats, TunnelError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut client_buf = vec![0u8; settings.buffer_size];
    let mut target_buf = vec![0u8; settings.buffer_size];
    let mut client_to_target = 0u64;
    let mut target_to_client = 0u64;
    let mut idle = 0u32;

    let stats = |closed_by, client_to_target, target_to_client| RelayStats {
        client_to_target,
        target_to_client,
        closed_by,
    };

    while idle < settings.idle_polls {
        tokio::select! {
            read = client.read(&mut client_buf) => {
                let n = read?;
                if n == 0 {
                    return Ok(stats(Side::Client, client_to_target, target_to_client));
                }
                trace!(bytes = n, "Forwarding data from client to target");
                forward(target, &client_buf[..n]).await?;
                client_to_target += n as u64;
                idle = 0;
            }
            read = target.read(&mut target_buf) => {
                let n = read?;
                if n == 0 {
                    return Ok(stats(Side::Target, client_to_target, target_to_client));
                }
                trace!(bytes = n, "Forwarding data from target to client");
                forward(client, &target_buf[..n]).await?;
                target_to_client += n as u64;
                idle = 0;
            }
            () = tokio::time::sleep(settings.poll_interval) => {
                idle += 1;
            }
        }
    }

    Err(TunnelError::IdleTimeout(
        settings.poll_interval * settings.idle_polls,
    ))
}

async fn forward<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> std::io::Result<()> {
    writer.write_all(data).await?;
    writer.flush().await
}
