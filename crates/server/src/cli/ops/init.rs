use clap::Args;

use charm_server::{AppConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Host name clients will use to reach this server
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Address both listeners bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_addr: String,

    /// SSH control plane port
    #[arg(long, default_value_t = 35353)]
    pub ssh_port: u16,

    /// HTTP data plane port
    #[arg(long, default_value_t = 35354)]
    pub http_port: u16,

    /// Scheme advertised to clients for the data plane
    #[arg(long, default_value = "http")]
    pub http_scheme: String,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = AppConfig {
            host: self.host.clone(),
            bind_addr: self.bind_addr.clone(),
            ssh_port: self.ssh_port,
            http_port: self.http_port,
            http_scheme: self.http_scheme.clone(),
            ..Default::default()
        };

        let state = AppState::init(ctx.data_dir.clone(), Some(config))?;
        let host_key = state.load_host_key()?;

        Ok(format!(
            "Initialized charm data directory at: {}\n\
             - Database: {}\n\
             - Host key: {} ({})\n\
             - Files: {}\n\
             - Config: {}\n\
             - SSH: {}:{}\n\
             - HTTP: {}://{}:{}",
            state.data_dir.display(),
            state.db_path.display(),
            state.host_key_path.display(),
            common::crypto::AuthorizedKey::from(&host_key.public()),
            state.files_path.display(),
            state.config_path.display(),
            state.config.bind_addr,
            state.config.ssh_port,
            state.config.http_scheme,
            state.config.host,
            state.config.http_port,
        ))
    }
}
