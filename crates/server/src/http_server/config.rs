use std::net::SocketAddr;

use crate::ServiceConfig;

/// Listener settings for the data plane.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// level request/response traces are emitted at
    pub log_level: tracing::Level,
}

impl From<&ServiceConfig> for Config {
    fn from(service: &ServiceConfig) -> Self {
        Self {
            listen_addr: service.http_listen_addr,
            log_level: service.log_level,
        }
    }
}
