use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::prelude::SecretKey;

use crate::service_state::{
    ServiceSettings, DEFAULT_JWT_TTL, DEFAULT_LINK_TIMEOUT, DEFAULT_MAX_ENCRYPT_KEY_SIZE,
};

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_DIR_NAME: &str = "db";
pub const DB_FILE_NAME: &str = "charm.sqlite";
pub const SSH_DIR_NAME: &str = ".ssh";
pub const HOST_KEY_FILE_NAME: &str = "charm_server";
pub const FILES_DIR_NAME: &str = "files";
pub const LOGS_DIR_NAME: &str = "logs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host name clients use to reach this server
    #[serde(default = "default_host")]
    pub host: String,
    /// Address both listeners bind to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Scheme advertised to clients in `api-auth`
    #[serde(default = "default_http_scheme")]
    pub http_scheme: String,
    #[serde(default = "default_jwt_audience")]
    pub jwt_audience: String,
    #[serde(default = "default_jwt_ttl_secs")]
    pub jwt_ttl_secs: u64,
    #[serde(default = "default_link_timeout_secs")]
    pub link_timeout_secs: u64,
    #[serde(default = "default_max_encrypt_key_size")]
    pub max_encrypt_key_size: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Write logs to daily rolling files here as well as stdout
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_ssh_port() -> u16 {
    35353
}

fn default_http_port() -> u16 {
    35354
}

fn default_http_scheme() -> String {
    "http".to_string()
}

fn default_jwt_audience() -> String {
    common::protocol::DEFAULT_AUDIENCE.to_string()
}

fn default_jwt_ttl_secs() -> u64 {
    DEFAULT_JWT_TTL.as_secs()
}

fn default_link_timeout_secs() -> u64 {
    DEFAULT_LINK_TIMEOUT.as_secs()
}

fn default_max_encrypt_key_size() -> usize {
    DEFAULT_MAX_ENCRYPT_KEY_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            bind_addr: default_bind_addr(),
            ssh_port: default_ssh_port(),
            http_port: default_http_port(),
            http_scheme: default_http_scheme(),
            jwt_audience: default_jwt_audience(),
            jwt_ttl_secs: default_jwt_ttl_secs(),
            link_timeout_secs: default_link_timeout_secs(),
            max_encrypt_key_size: default_max_encrypt_key_size(),
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    pub fn settings(&self) -> ServiceSettings {
        ServiceSettings {
            http_scheme: self.http_scheme.clone(),
            jwt_audience: self.jwt_audience.clone(),
            jwt_ttl: Duration::from_secs(self.jwt_ttl_secs),
            link_timeout: Duration::from_secs(self.link_timeout_secs),
            max_encrypt_key_size: self.max_encrypt_key_size,
        }
    }

    pub fn log_level(&self) -> Result<tracing::Level, StateError> {
        self.log_level
            .parse()
            .map_err(|_| StateError::InvalidConfig(format!("log_level {:?}", self.log_level)))
    }
}

/// Layout of a server data directory.
#[derive(Debug, Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub host_key_path: PathBuf,
    pub files_path: PathBuf,
    pub config_path: PathBuf,
    pub config: AppConfig,
}

impl AppState {
    pub fn data_dir(custom_path: Option<PathBuf>) -> PathBuf {
        custom_path.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    fn layout(data_dir: PathBuf, config: AppConfig) -> Self {
        Self {
            db_path: data_dir.join(DB_DIR_NAME).join(DB_FILE_NAME),
            host_key_path: data_dir.join(SSH_DIR_NAME).join(HOST_KEY_FILE_NAME),
            files_path: data_dir.join(FILES_DIR_NAME),
            config_path: data_dir.join(CONFIG_FILE_NAME),
            data_dir,
            config,
        }
    }

    /// Initialize a new data directory with a fresh host key
    pub fn init(custom_path: Option<PathBuf>, config: Option<AppConfig>) -> Result<Self, StateError> {
        let data_dir = Self::data_dir(custom_path);
        if data_dir.join(CONFIG_FILE_NAME).exists() {
            return Err(StateError::AlreadyInitialized);
        }

        let state = Self::layout(data_dir, config.unwrap_or_default());
        fs::create_dir_all(&state.data_dir)?;
        fs::create_dir_all(state.data_dir.join(DB_DIR_NAME))?;
        fs::create_dir_all(state.data_dir.join(SSH_DIR_NAME))?;
        fs::create_dir_all(&state.files_path)?;

        let key = SecretKey::generate();
        fs::write(&state.host_key_path, key.to_pem())?;
        restrict_permissions(&state.host_key_path)?;
        fs::write(
            state.host_key_path.with_extension("pub"),
            format!(
                "{} charm-server\n",
                common::crypto::AuthorizedKey::from(&key.public())
            ),
        )?;

        fs::write(&state.config_path, toml::to_string_pretty(&state.config)?)?;
        Ok(state)
    }

    /// Load an existing data directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let data_dir = Self::data_dir(custom_path);
        if !data_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let config_path = data_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }
        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;

        let state = Self::layout(data_dir, config);
        if !state.host_key_path.exists() {
            return Err(StateError::MissingFile(format!(
                "{}/{}",
                SSH_DIR_NAME, HOST_KEY_FILE_NAME
            )));
        }
        fs::create_dir_all(state.data_dir.join(DB_DIR_NAME))?;
        fs::create_dir_all(&state.files_path)?;
        Ok(state)
    }

    pub fn load_host_key(&self) -> Result<SecretKey, StateError> {
        let pem = fs::read_to_string(&self.host_key_path)?;
        SecretKey::from_pem(&pem).map_err(|e| StateError::InvalidKey(e.to_string()))
    }

    /// Log directory, relative paths resolved against the data directory
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.config.log_dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                self.data_dir.join(dir)
            }
        })
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &std::path::Path) -> std::io::Result<()> {
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("data directory not initialized. Run 'charm-server init' first")]
    NotInitialized,

    #[error("data directory already initialized")]
    AlreadyInitialized,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");

        let created = AppState::init(Some(root.clone()), None).unwrap();
        assert!(created.host_key_path.exists());
        assert!(created.host_key_path.with_extension("pub").exists());
        assert!(created.files_path.is_dir());

        let loaded = AppState::load(Some(root.clone())).unwrap();
        assert_eq!(loaded.config, AppConfig::default());
        assert_eq!(
            loaded.load_host_key().unwrap().public(),
            created.load_host_key().unwrap().public()
        );

        assert!(matches!(
            AppState::init(Some(root), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_load_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::load(Some(dir.path().join("nope"))),
            Err(StateError::NotInitialized)
        ));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = toml::from_str("ssh_port = 2222\nlink_timeout_secs = 5").unwrap();
        assert_eq!(config.ssh_port, 2222);
        assert_eq!(config.http_port, 35354);
        assert_eq!(config.settings().link_timeout, Duration::from_secs(5));
        assert_eq!(config.log_level().unwrap(), tracing::Level::INFO);
    }
}
