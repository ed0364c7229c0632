use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tracing::info;

use tunnel_relay::{Config, ConfigFile, Frontend, Server, load_config};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Optional TOML configuration file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    frontend: FrontendCommand,
}

#[derive(Subcommand, Debug)]
enum FrontendCommand {
    /// Accept `Upgrade: websocket` requests (default port 7000)
    Websocket {
        #[command(flatten)]
        common: CommonArgs,

        /// Wrap client connections in TLS
        #[arg(long)]
        tls: bool,

        /// PEM certificate chain used with --tls
        #[arg(long, requires = "tls")]
        cert: Option<String>,

        /// PEM private key used with --tls
        #[arg(long, requires = "tls")]
        key: Option<String>,
    },
    /// Accept HTTP CONNECT-style requests (default port 900)
    Connect {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Address to listen on
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Shared secret expected in X-Pass
    #[arg(long)]
    password: Option<String>,

    /// Destination used when a request has no X-Real-Host
    #[arg(long)]
    target: Option<String>,
}

impl CommonArgs {
    fn apply(self, file: &mut ConfigFile) {
        if let Some(bind) = self.bind {
            file.listen.ip = Some(bind);
        }
        if let Some(port) = self.port {
            file.listen.port = Some(port);
        }
        if let Some(password) = self.password {
            file.tunnel.password = Some(password);
        }
        if let Some(target) = self.target {
            file.tunnel.default_target = Some(target);
        }
    }
}

fn build_config(cli: Cli) -> Result<Config> {
    let mut file = match &cli.config {
        Some(path) => load_config(path)?,
        None => ConfigFile::default(),
    };

    let frontend = match cli.frontend {
        FrontendCommand::Websocket {
            common,
            tls,
            cert,
            key,
        } => {
            common.apply(&mut file);
            if tls {
                let mut tls_config = file.listen.tls.take().unwrap_or_default();
                if let Some(cert) = cert {
                    tls_config.cert_file = cert;
                }
                if let Some(key) = key {
                    tls_config.key_file = key;
                }
                file.listen.tls = Some(tls_config);
            }
            Frontend::WebSocket
        }
        FrontendCommand::Connect { common } => {
            common.apply(&mut file);
            Frontend::Connect
        }
    };

    Config::resolve(frontend, file).context("Invalid configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install the TLS crypto provider"))?;

    let config = Arc::new(build_config(Cli::parse())?);
    info!(
        frontend = %config.tunnel.frontend,
        listen_addr = %config.listen_addr(),
        default_target = %config.tunnel.default_target,
        password = config.tunnel.password.is_some(),
        idle_timeout = ?config.tunnel.idle_budget(),
        "Configuration loaded"
    );

    let server = Server::bind(config).await?.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Stopping");
    server.stop().await;

    Ok(())
}
