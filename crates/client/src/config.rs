use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("server host is empty")]
    EmptyServerHost,
    #[error("invalid local address {0:?}: {1}")]
    InvalidLocalAddr(String, String),
    #[error("failed to discover outbound IP: {0}")]
    OutboundIpDiscovery(#[source] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    /// Raw `-i` input: empty/None, a bare host, or `host:port`.
    pub local_addr: Option<String>,
    pub timeout: Duration,
    pub basic: bool,
    pub verbose: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: String::new(),
            server_port: 3478,
            local_addr: None,
            timeout: Duration::from_secs(3),
            basic: false,
            verbose: false,
        }
    }
}

impl ClientConfig {
    /// Resolve `local_addr` into a concrete `(IP, port)`, discovering
    /// the outbound IP via a throwaway UDP "connection" when the host
    /// part is unspecified. Port `0` means "let the OS pick".
    pub async fn resolve_local_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.server_host.is_empty() {
            return Err(ConfigError::EmptyServerHost);
        }

        let raw = self.local_addr.as_deref().unwrap_or("");

        let (host_part, port_part) = match raw.split_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (raw, None),
        };

        let ip: IpAddr = if host_part.is_empty() {
            net::outbound_ip().await.map_err(ConfigError::OutboundIpDiscovery)?
        } else {
            host_part
                .parse()
                .map_err(|_| ConfigError::InvalidLocalAddr(raw.to_string(), "host is not an IP address".into()))?
        };

        let port: u16 = match port_part {
            Some(p) if !p.is_empty() => p
                .parse()
                .map_err(|_| ConfigError::InvalidLocalAddr(raw.to_string(), "port is not numeric".into()))?,
            _ => 0,
        };

        Ok(SocketAddr::new(ip, port))
    }
}
