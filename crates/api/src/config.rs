use std::net::{Ipv4Addr, SocketAddr};

/// Port used when no address is configured.
pub const DEFAULT_PORT: u16 = 8080;

/// Upper bound of requests whose handlers run at the same time.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 128;

/// Largest request body read into memory, 2 MiB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Runtime settings of a [`Server`](crate::Server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Addresses tried in order when binding; the first that succeeds is used.
    pub address: Vec<SocketAddr>,

    /// Handlers beyond this bound wait for a running one to finish.
    pub max_concurrent_requests: usize,

    /// Bodies larger than this are rejected with `413 Payload Too Large`.
    pub max_body_size: usize,
}

impl ServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self { address: vec![SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))], ..Self::default() }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: vec![SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))],
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_MAX_BODY_SIZE, ServerConfig};
    use std::net::SocketAddr;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.address, vec!["0.0.0.0:8080".parse::<SocketAddr>().unwrap()]);
        assert_eq!(config.max_concurrent_requests, 128);
        assert_eq!(config.max_body_size, DEFAULT_MAX_BODY_SIZE);
    }

    #[test]
    fn test_with_port() {
        let config = ServerConfig::with_port(0);
        assert_eq!(config.address[0].port(), 0);
        assert_eq!(config.max_body_size, DEFAULT_MAX_BODY_SIZE);
    }
}
