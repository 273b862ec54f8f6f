use std::net::{IpAddr, SocketAddr};

use clap::Args;

use charm_server::{spawn_service, AppState, ServiceConfig, StateError};

#[derive(Args, Debug, Clone)]
pub struct Serve {
    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<tracing::Level>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),

    #[error("invalid bind address: {0}")]
    BindAddr(#[from] std::net::AddrParseError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Serve {
    type Error = ServeError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.data_dir.clone())?;
        let host_key = state.load_host_key()?;
        let bind_ip: IpAddr = state.config.bind_addr.parse()?;

        let log_level = match self.log_level {
            Some(level) => level,
            None => state.config.log_level()?,
        };

        let config = ServiceConfig {
            host_key,
            sqlite_path: Some(state.db_path.clone()),
            files_path: state.files_path.clone(),
            ssh_listen_addr: SocketAddr::new(bind_ip, state.config.ssh_port),
            http_listen_addr: SocketAddr::new(bind_ip, state.config.http_port),
            settings: state.config.settings(),
            log_level,
            log_dir: state.log_dir(),
        };

        spawn_service(&config).await;
        Ok("charm server stopped".to_string())
    }
}
