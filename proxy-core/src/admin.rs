//! Reachability probe for the admin service behind the relay

use crate::config::RelayConfig;
use crate::error::ProxyError;
use crate::Result;
use std::time::Duration;
use tracing::{info, warn};

/// Marker the admin service puts in its body when it answers for real
pub const ADMIN_MARKER: &str = "I am admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminStatus {
    /// Admin answered and identified itself
    Granted,
    /// Something answered, but not the admin service
    Forbidden,
    /// The probe request failed
    Unreachable,
}

#[derive(Debug, Clone)]
pub struct AdminProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl AdminProbe {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProxyError::Configuration(format!("Failed to build probe client: {}", e)))?;
        Ok(Self {
            client,
            url: config.admin_url(),
            timeout: config.admin_check_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn check(&self) -> AdminStatus {
        match self.fetch().await {
            Ok(body) if body.contains(ADMIN_MARKER) => {
                info!("Admin check passed");
                AdminStatus::Granted
            }
            Ok(_) => AdminStatus::Forbidden,
            Err(e) => {
                warn!("Error contacting admin service at {}: {}", self.url, e);
                AdminStatus::Unreachable
            }
        }
    }

    async fn fetch(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await?;
        Ok(response.text().await?)
    }
}
