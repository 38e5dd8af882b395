//! Command line / environment configuration for the flag services

use crate::error::ServiceError;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};

/// Admin service: hands out FLAG2 on `GET /admin`
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct AdminArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "ADMIN_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Flag returned by `/admin`
    #[arg(long, env = "FLAG2", default_value = "Fake flag 2", hide_env_values = true)]
    pub flag: String,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON")]
    pub json_logs: bool,
}

/// User service: hands out FLAG1 when asked nicely
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct UserArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "USER_PORT", default_value_t = 1337)]
    pub port: u16,

    /// Flag returned for the trigger phrase
    #[arg(long, env = "FLAG1", default_value = "Fake flag 1", hide_env_values = true)]
    pub flag: String,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON")]
    pub json_logs: bool,
}

pub(crate) fn listen_addr(host: &str, port: u16) -> Result<SocketAddr, ServiceError> {
    let ip: IpAddr = host
        .parse()
        .map_err(|_| ServiceError::Address(host.to_string()))?;
    Ok(SocketAddr::new(ip, port))
}

impl AdminArgs {
    pub fn listen_addr(&self) -> Result<SocketAddr, ServiceError> {
        listen_addr(&self.host, self.port)
    }
}

impl UserArgs {
    pub fn listen_addr(&self) -> Result<SocketAddr, ServiceError> {
        listen_addr(&self.host, self.port)
    }
}
