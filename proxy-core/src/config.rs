//! Configuration types and utilities

use crate::{error::ProxyError, filter::DEFAULT_KEYWORDS};
use clap::Parser;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Static HTTP relay configuration, fixed at startup
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the proxy service listens on
    pub listen_address: SocketAddr,
    /// Host running both the user and the admin service
    pub target_host: String,
    /// User service port (every non-reserved path is forwarded here)
    pub user_port: u16,
    /// Admin service port (probed by `/admin_check`)
    pub admin_port: u16,
    /// Timeout applied to the admin probe
    pub admin_check_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([0, 0, 0, 0], 8000)),
            target_host: "10.0.0.5".to_string(),
            user_port: 1337,
            admin_port: 3000,
            admin_check_timeout: Duration::from_secs(3),
        }
    }
}

impl RelayConfig {
    pub fn user_base_url(&self) -> String {
        format!("http://{}:{}", self.target_host, self.user_port)
    }

    pub fn admin_url(&self) -> String {
        format!("http://{}:{}/admin", self.target_host, self.admin_port)
    }
}

/// One ingress port of the tunnel relay: clients connecting to `listen`
/// are tunnelled to `target_port` on the agent's loopback interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortForward {
    pub listen: SocketAddr,
    pub target_port: u16,
}

impl FromStr for PortForward {
    type Err = ProxyError;

    /// Accepts `LISTEN_ADDR=TARGET_PORT` or a bare `PORT` (all interfaces,
    /// same port on the agent side).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProxyError::Configuration(format!("invalid port forward '{}'", s));
        match s.split_once('=') {
            Some((listen, port)) => Ok(Self {
                listen: listen.trim().parse().map_err(|_| invalid())?,
                target_port: port.trim().parse().map_err(|_| invalid())?,
            }),
            None => {
                let port: u16 = s.trim().parse().map_err(|_| invalid())?;
                Ok(Self {
                    listen: SocketAddr::from(([0, 0, 0, 0], port)),
                    target_port: port,
                })
            }
        }
    }
}

/// Static tunnel relay configuration
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Where agents connect
    pub agent_listen: SocketAddr,
    /// The only agent name accepted at registration
    pub agent_name: String,
    /// Client ingress ports
    pub forwards: Vec<PortForward>,
    /// How long an agent has to send its name line
    pub registration_timeout: Duration,
    /// How long to wait for a `ConnectResponse`
    pub connect_timeout: Duration,
    /// Keepalive ping interval; `None` disables pings
    pub ping_interval: Option<Duration>,
    /// Keywords overwritten in client -> agent traffic
    pub redact_keywords: Vec<String>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            agent_listen: SocketAddr::from(([0, 0, 0, 0], 19001)),
            agent_name: "agent".to_string(),
            forwards: Vec::new(),
            registration_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            ping_interval: None,
            redact_keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Reverse proxy in front of the user service
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ProxyServiceArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    pub listen_addr: String,

    /// Port to listen on
    #[arg(long, env = "PROXY_PORT", default_value_t = 8000)]
    pub listen_port: u16,

    /// Host running the user and admin services
    #[arg(long, env = "TARGET_HOST", default_value = "10.0.0.5")]
    pub target_host: String,

    /// User service port
    #[arg(long, env = "USER_PORT", default_value_t = 1337)]
    pub user_port: u16,

    /// Admin service port
    #[arg(long, env = "ADMIN_PORT", default_value_t = 3000)]
    pub admin_port: u16,

    /// Timeout in seconds for the admin probe
    #[arg(long, default_value_t = 3)]
    pub admin_check_timeout: u64,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON")]
    pub json_logs: bool,
}

impl ProxyServiceArgs {
    pub fn into_config(self) -> Result<RelayConfig, ProxyError> {
        let listen_address = format!("{}:{}", self.listen_addr, self.listen_port)
            .parse()
            .map_err(|_| {
                ProxyError::Configuration(format!("invalid listen address '{}'", self.listen_addr))
            })?;
        Ok(RelayConfig {
            listen_address,
            target_host: self.target_host,
            user_port: self.user_port,
            admin_port: self.admin_port,
            admin_check_timeout: Duration::from_secs(self.admin_check_timeout),
        })
    }
}

/// Tunnel relay: accepts one agent and tunnels client ports through it
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct TunnelRelayArgs {
    /// Address agents connect to
    #[arg(long, env = "AGENT_LISTEN", default_value = "0.0.0.0:19001")]
    pub agent_listen: SocketAddr,

    /// Name the agent must announce
    #[arg(long, env = "AGENT_NAME", default_value = "agent")]
    pub agent_name: String,

    /// Client ports to tunnel, as `LISTEN_ADDR=TARGET_PORT` or `PORT`
    #[arg(long = "forward", env = "FORWARDS", value_delimiter = ',')]
    pub forwards: Vec<PortForward>,

    /// Seconds an agent has to announce its name
    #[arg(long, default_value_t = 10)]
    pub registration_timeout: u64,

    /// Seconds to wait for the agent to open an upstream connection
    #[arg(long, default_value_t = 5)]
    pub connect_timeout: u64,

    /// Keepalive ping interval in seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    pub ping_interval: u64,

    /// Keywords redacted from client traffic (defaults to the challenge set)
    #[arg(long = "redact", value_delimiter = ',')]
    pub redact_keywords: Vec<String>,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON")]
    pub json_logs: bool,
}

impl TunnelRelayArgs {
    pub fn into_config(self) -> TunnelConfig {
        let defaults = TunnelConfig::default();
        TunnelConfig {
            agent_listen: self.agent_listen,
            agent_name: self.agent_name,
            forwards: self.forwards,
            registration_timeout: Duration::from_secs(self.registration_timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            ping_interval: (self.ping_interval > 0).then(|| Duration::from_secs(self.ping_interval)),
            redact_keywords: if self.redact_keywords.is_empty() {
                defaults.redact_keywords
            } else {
                self.redact_keywords
            },
        }
    }
}
