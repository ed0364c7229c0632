use anyhow::{Context, Result};
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
    time::timeout,
};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::TunnelError;
use crate::proxy::{TunnelResult, handle_connection};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::stream::ClientStream;
use crate::tls::build_acceptor;

/// A bound listener that has not started accepting yet.
pub struct Server {
    listener: TcpListener,
    config: Arc<Config>,
    acceptor: Option<TlsAcceptor>,
}

impl Server {
    /// Binds the listening socket and loads TLS material. Any failure here
    /// means the server does not start.
    pub async fn bind(config: Arc<Config>) -> Result<Self> {
        let acceptor = config
            .listen
            .tls
            .as_ref()
            .map(build_acceptor)
            .transpose()?;

        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to address {addr}"))?;

        Ok(Self {
            listener,
            config,
            acceptor,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to get bound listener local address")
    }

    /// Starts the accept loop on its own task.
    pub fn start(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let registry = ConnectionRegistry::new();

        info!(
            listen_addr = %local_addr,
            frontend = %self.config.tunnel.frontend,
            tls = self.acceptor.is_some(),
            default_target = %self.config.tunnel.default_target,
            "Tunnel front-end listening"
        );

        let accept_loop = tokio::spawn(accept_loop(self, running.clone(), registry.clone()));

        Ok(ServerHandle {
            local_addr,
            running,
            registry,
            accept_loop,
        })
    }
}

/// Control side of a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    registry: ConnectionRegistry,
    accept_loop: JoinHandle<()>,
}

impl ServerHandle {
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Stops accepting, then force-closes every live tunnel. Returns once the
    /// accept loop has exited and no tracked connection is left.
    pub async fn stop(self) {
        self.running.store(false, Ordering::Release);
        if let Err(e) = self.accept_loop.await {
            error!(error = %e, "Accept loop ended abnormally");
        }
        let closed = self.registry.close_all().await;
        info!(closed, "Server stopped");
    }
}

async fn accept_loop(server: Server, running: Arc<AtomicBool>, registry: ConnectionRegistry) {
    let Server {
        listener,
        config,
        acceptor,
    } = server;
    let poll = config.listen.accept_poll;

    while running.load(Ordering::Acquire) {
        let (stream, peer) = match timeout(poll, listener.accept()).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to accept connection");
                continue;
            }
            Ok(Ok(accepted)) => accepted,
        };

        if !config.listen.client_filter.allows(peer.ip()) {
            warn!(client_addr = %peer, "Rejected connection from disallowed address");
            continue;
        }

        let id = ConnectionId::new();
        debug!(connection_id = %id, client_addr = %peer, "Accepted connection");

        let config = config.clone();
        let acceptor = acceptor.clone();
        registry.spawn(id, async move {
            serve_client(stream, id, peer, acceptor.as_ref(), &config).await;
        });
    }

    debug!("Accept loop stopped");
}

async fn serve_client(
    stream: TcpStream,
    id: ConnectionId,
    peer: SocketAddr,
    acceptor: Option<&TlsAcceptor>,
    config: &Config,
) {
    stream.set_nodelay(true).ok();
    let client = match ClientStream::accept(stream, acceptor).await {
        Ok(client) => client,
        Err(e) => {
            warn!(connection_id = %id, client_addr = %peer, error = %e, "TLS handshake failed");
            return;
        }
    };

    let result = handle_connection(client, id, peer, &config.tunnel).await;
    log_outcome(id, peer, &result);
}

fn log_outcome(id: ConnectionId, peer: SocketAddr, result: &TunnelResult) {
    match result {
        Ok(Some(stats)) => info!(
            connection_id = %id,
            client_addr = %peer,
            sent = stats.client_to_target,
            received = stats.target_to_client,
            closed_by = ?stats.closed_by,
            "Tunnel closed"
        ),
        Ok(None) => debug!(connection_id = %id, client_addr = %peer, "Connection closed without a request"),
        Err(e @ TunnelError::IdleTimeout(_)) => {
            info!(connection_id = %id, client_addr = %peer, "Tunnel closed: {e}");
        }
        Err(e @ TunnelError::Io(_)) => {
            debug!(connection_id = %id, client_addr = %peer, error = %e, "Tunnel closed on I/O error");
        }
        Err(e) if e.is_rejection() => {
            warn!(connection_id = %id, client_addr = %peer, error = %e, "Request rejected");
        }
        Err(e) => warn!(connection_id = %id, client_addr = %peer, error = %e, "Connection failed"),
    }
}
