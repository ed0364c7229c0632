use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

use crate::handshake::Frontend;
use crate::security::ClientFilter;

pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_TARGET: &str = "127.0.0.1:109";
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_ACCEPT_POLL: Duration = Duration::from_secs(2);
pub const DEFAULT_PROXY_AGENT: &str = "Proxy-Agent: tunnel-relay";
pub const DEFAULT_SERVER_HEADER: &str = "nginx";
pub const DEFAULT_CERT_FILE: &str = "/etc/ssl/certs/server.crt";
pub const DEFAULT_KEY_FILE: &str = "/etc/ssl/private/server.key";

/// On-disk configuration. Every field is optional; gaps are filled with the
/// defaults of the selected front-end by [`Config::resolve`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub listen: ListenSection,
    pub tunnel: TunnelSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenSection {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub allowed_client_ips: Option<Vec<String>>,
    pub accept_poll_ms: Option<u64>,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TunnelSection {
    pub default_target: Option<String>,
    pub password: Option<String>,
    pub buffer_size: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub idle_polls: Option<u32>,
    pub proxy_agent: Option<String>,
    pub server_header: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_file: DEFAULT_CERT_FILE.to_string(),
            key_file: DEFAULT_KEY_FILE.to_string(),
        }
    }
}

/// Settings fixed at startup and shared read-only by the listener and every
/// connection handler.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: ListenConfig,
    pub tunnel: TunnelConfig,
}

#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub ip: String,
    pub port: u16,
    pub client_filter: ClientFilter,
    pub accept_poll: Duration,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub frontend: Frontend,
    /// Used when the client sends no `X-Real-Host`. May be empty, in which
    /// case such requests are rejected as malformed.
    pub default_target: String,
    /// Shared secret compared against `X-Pass`. `None` disables the check.
    pub password: Option<String>,
    pub buffer_size: usize,
    pub poll_interval: Duration,
    pub idle_polls: u32,
    /// Header line placed in the CONNECT `200` response.
    pub proxy_agent: String,
    /// `Server:` value in the `101` response. Empty leaves out both the
    /// `Server:` and `Keep-Alive:` lines.
    pub server_header: String,
}

impl TunnelConfig {
    /// Defaults for `frontend`.
    #[must_use]
    pub fn new(frontend: Frontend) -> Self {
        Self {
            frontend,
            default_target: DEFAULT_TARGET.to_string(),
            password: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle_polls: frontend.default_idle_polls(),
            proxy_agent: DEFAULT_PROXY_AGENT.to_string(),
            server_header: DEFAULT_SERVER_HEADER.to_string(),
        }
    }

    /// Total time a tunnel may stay silent before it is closed.
    #[must_use]
    pub fn idle_budget(&self) -> Duration {
        self.poll_interval * self.idle_polls
    }
}

impl Config {
    /// Builds the runtime configuration for `frontend`, taking values from
    /// `file` where present.
    pub fn resolve(frontend: Frontend, file: ConfigFile) -> Result<Self> {
        let ConfigFile { listen, tunnel } = file;
        let defaults = TunnelConfig::new(frontend);

        let client_filter = ClientFilter::parse(listen.allowed_client_ips.as_deref())?;

        let tunnel = TunnelConfig {
            frontend,
            default_target: tunnel.default_target.unwrap_or(defaults.default_target),
            password: tunnel.password.filter(|p| !p.is_empty()),
            buffer_size: tunnel.buffer_size.unwrap_or(defaults.buffer_size),
            poll_interval: tunnel
                .poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            idle_polls: tunnel.idle_polls.unwrap_or(defaults.idle_polls),
            proxy_agent: tunnel.proxy_agent.unwrap_or(defaults.proxy_agent),
            server_header: tunnel.server_header.unwrap_or(defaults.server_header),
        };

        let config = Self {
            listen: ListenConfig {
                ip: listen.ip.unwrap_or_else(|| DEFAULT_BIND.to_string()),
                port: listen.port.unwrap_or_else(|| frontend.default_port()),
                client_filter,
                accept_poll: listen
                    .accept_poll_ms
                    .map_or(DEFAULT_ACCEPT_POLL, Duration::from_millis),
                tls: listen.tls,
            },
            tunnel,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.tunnel.buffer_size > 0, "buffer_size must be greater than zero");
        ensure!(
            !self.tunnel.poll_interval.is_zero(),
            "poll_interval_ms must be greater than zero"
        );
        ensure!(self.tunnel.idle_polls > 0, "idle_polls must be greater than zero");
        ensure!(
            !self.listen.accept_poll.is_zero(),
            "accept_poll_ms must be greater than zero"
        );
        Ok(())
    }

    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen.ip, self.listen.port)
    }
}

pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse {} as valid TOML", path.display()))
}
