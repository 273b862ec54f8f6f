use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use common::crypto::SecretKey;
use common::protocol::DEFAULT_AUDIENCE;

use crate::auth::{TokenError, TokenIssuer};
use crate::database::{Database, DatabaseSetupError};
use crate::files::FileStore;
use crate::service_config::Config;
use crate::ssh::LinkBroker;

pub const DEFAULT_JWT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_LINK_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ENCRYPT_KEY_SIZE: usize = 16 * 1024;

/// Knobs shared by the SSH and HTTP surfaces.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// scheme clients should use to reach the data plane
    pub http_scheme: String,
    pub jwt_audience: String,
    pub jwt_ttl: Duration,
    pub link_timeout: Duration,
    /// largest accepted encrypted ring key, in bytes
    pub max_encrypt_key_size: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            http_scheme: "http".to_string(),
            jwt_audience: DEFAULT_AUDIENCE.to_string(),
            jwt_ttl: DEFAULT_JWT_TTL,
            link_timeout: DEFAULT_LINK_TIMEOUT,
            max_encrypt_key_size: DEFAULT_MAX_ENCRYPT_KEY_SIZE,
        }
    }
}

/// Main service state, shared by every SSH session and HTTP request
#[derive(Clone)]
pub struct State {
    database: Database,
    tokens: Arc<TokenIssuer>,
    links: LinkBroker,
    files: FileStore,
    settings: Arc<ServiceSettings>,
}

impl State {
    pub async fn from_config(config: &Config) -> Result<Self, StateSetupError> {
        let sqlite_database_url = match config.sqlite_path {
            Some(ref path) => {
                if let Some(parent) = path.parent() {
                    if !parent.exists() {
                        return Err(StateSetupError::DatabasePathDoesNotExist);
                    }
                }
                Url::parse(&format!("sqlite://{}", path.display()))
                    .map_err(|_| StateSetupError::InvalidDatabaseUrl)
            }
            // otherwise just set up an in-memory database
            None => Url::parse("sqlite::memory:").map_err(|_| StateSetupError::InvalidDatabaseUrl),
        }?;
        tracing::info!("Database URL: {:?}", sqlite_database_url);
        let database = Database::connect(&sqlite_database_url).await?;

        std::fs::create_dir_all(&config.files_path)?;

        Self::new(
            database,
            &config.host_key,
            config.settings.clone(),
            config.files_path.clone(),
        )
    }

    pub fn new(
        database: Database,
        host_key: &SecretKey,
        settings: ServiceSettings,
        files_root: impl Into<PathBuf>,
    ) -> Result<Self, StateSetupError> {
        let tokens = TokenIssuer::new(host_key, settings.jwt_audience.clone(), settings.jwt_ttl)?;
        Ok(Self {
            database,
            tokens: Arc::new(tokens),
            links: LinkBroker::new(),
            files: FileStore::new(files_root),
            settings: Arc::new(settings),
        })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn links(&self) -> &LinkBroker {
        &self.links
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("Database setup error")]
    DatabaseSetupError(#[from] DatabaseSetupError),
    #[error("Database path does not exist")]
    DatabasePathDoesNotExist,
    #[error("Invalid database URL")]
    InvalidDatabaseUrl,
    #[error("Token issuer setup error: {0}")]
    Tokens(#[from] TokenError),
    #[error("File store setup error: {0}")]
    Files(#[from] std::io::Error),
}
