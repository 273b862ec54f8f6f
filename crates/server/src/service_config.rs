use std::net::SocketAddr;
use std::path::PathBuf;

use common::prelude::SecretKey;

use crate::service_state::ServiceSettings;

#[derive(Debug)]
pub struct Config {
    /// host key used for SSH and for signing tokens
    pub host_key: SecretKey,

    // data store configuration
    /// a path to a sqlite database, if not set then an
    ///  in-memory database will be used
    pub sqlite_path: Option<PathBuf>,
    /// Root of the per-account file store
    pub files_path: PathBuf,

    // listeners
    pub ssh_listen_addr: SocketAddr,
    pub http_listen_addr: SocketAddr,

    pub settings: ServiceSettings,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}
