use std::{borrow::Cow, net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::auth::Authorizer;
use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::headers::{IncomingRequest, PASSWORD, REAL_HOST};
use crate::registry::ConnectionId;
use crate::relay::{RelaySettings, RelayStats, relay};
use crate::target::Destination;

/// `Ok(None)` means the client went away before sending a request.
pub type TunnelResult = Result<Option<RelayStats>, TunnelError>;

/// One client connection and, once dialed, its backend connection.
///
/// [`TunnelConnection::run`] consumes the connection and closes both sockets
/// on every path, so neither can be used or closed twice.
pub struct TunnelConnection<S> {
    client: S,
    target: Option<TcpStream>,
}

impl<S> TunnelConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub const fn new(client: S) -> Self {
        Self {
            client,
            target: None,
        }
    }

    /// Handshake, dial, relay, then close both ends.
    pub async fn run(mut self, config: &TunnelConfig) -> TunnelResult {
        let result = self.serve(config).await;
        self.close(config.poll_interval).await;
        result
    }

    async fn serve(&mut self, config: &TunnelConfig) -> TunnelResult {
        let mut buf = vec![0u8; config.buffer_size];
        let n = self.client.read(&mut buf).await?;
        if n == 0 {
            debug!("Client closed before sending a request");
            return Ok(None);
        }
        buf.truncate(n);
        let request = IncomingRequest::new(buf);

        let destination = match self.admit(&request, config).await {
            Ok(destination) => destination,
            Err(err) => {
                if let Some(response) = config.frontend.rejection(&err) {
                    // The rejection is what gets reported, not a failed write.
                    let _ = self.reply(response).await;
                }
                return Err(err);
            }
        };

        let target = self.target.insert(destination.connect().await?);
        info!(target_addr = %destination, "Connected to target server");

        self.client
            .write_all(&config.frontend.accept_response(&request, config))
            .await?;
        self.client.flush().await?;
        info!(frontend = %config.frontend, target_addr = %destination, "Tunnel established");

        let stats = relay(&mut self.client, target, RelaySettings::from(config)).await?;
        Ok(Some(stats))
    }

    /// Everything that happens before the dial: request shape, the decoy
    /// fragment, destination choice, password and destination policy.
    async fn admit(
        &mut self,
        request: &IncomingRequest,
        config: &TunnelConfig,
    ) -> Result<Destination, TunnelError> {
        let frontend = config.frontend;
        frontend.validate(request)?;

        if frontend.expects_split_fragment(request) {
            let mut decoy = vec![0u8; config.buffer_size];
            let n = self.client.read(&mut decoy).await?;
            debug!(bytes = n, "Discarded split fragment");
        }

        let target = request
            .non_empty_header(REAL_HOST)
            .unwrap_or(Cow::Borrowed(config.default_target.as_str()));
        if target.is_empty() {
            warn!("Request has no X-Real-Host and no default target is configured");
            return Err(TunnelError::malformed("no destination"));
        }

        let authorizer = Authorizer::new(
            config.password.as_deref(),
            &config.default_target,
            frontend.restricts_destinations(),
        );
        authorizer.check_password(request.header_bytes(PASSWORD))?;
        if let Err(err) = authorizer.check_destination(&target) {
            warn!(target_addr = %target, "Blocked destination");
            return Err(err);
        }

        Destination::parse(&target)
    }

    async fn reply(&mut self, response: &[u8]) -> std::io::Result<()> {
        self.client.write_all(response).await?;
        self.client.flush().await
    }

    /// Best effort: shutdown errors are ignored and a peer that stalls the
    /// shutdown is dropped after `grace`.
    async fn close(mut self, grace: Duration) {
        let _ = timeout(grace, self.client.shutdown()).await;
        if let Some(mut target) = self.target.take() {
            let _ = timeout(grace, target.shutdown()).await;
        }
    }
}

/// Runs one accepted connection to completion.
#[tracing::instrument(skip_all, fields(connection_id = %id, client_addr = %peer))]
pub async fn handle_connection<S>(
    client: S,
    id: ConnectionId,
    peer: SocketAddr,
    config: &TunnelConfig,
) -> TunnelResult
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    TunnelConnection::new(client).run(config).await
}
