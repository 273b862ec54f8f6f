use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_SSH_PORT: u16 = 35353;
pub const DEFAULT_HTTP_PORT: u16 = 35354;

/// Key algorithm used when a fresh identity has to be generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    #[default]
    Ed25519,
    Rsa,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_http_scheme")]
    pub http_scheme: String,
    /// Where identities and local KV stores live.
    /// Defaults to `<data dir>/charm/<host>`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub key_type: KeyType,
    /// Use this private key instead of the one in the data directory
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_http_scheme() -> String {
    "http".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            ssh_port: default_ssh_port(),
            http_port: default_http_port(),
            http_scheme: default_http_scheme(),
            data_dir: None,
            key_type: KeyType::default(),
            identity_file: None,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join("charm").join(&self.host))
                .ok_or(ConfigError::NoDataDir),
        }
    }

    /// Base URL of the HTTP data plane
    pub fn http_url(&self) -> Result<Url, ConfigError> {
        let url = format!("{}://{}:{}", self.http_scheme, self.host, self.http_port);
        Ok(Url::parse(&url)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine a data directory for this platform")]
    NoDataDir,
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML deserialization error: {0}")]
    Toml(#[from] toml::de::Error),
}
