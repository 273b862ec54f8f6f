//! Charm server: an SSH control plane for key-based identity and linking,
//! and an HTTP data plane gated by the bearer tokens it issues.

pub mod auth;
pub(crate) mod database;
pub mod files;
pub mod http_server;
pub mod process;
pub mod service_config;
pub mod service_state;
pub mod ssh;

// App state (configuration, paths)
pub mod state;

pub use database::{Database, DatabaseSetupError, StoreError, UserRecord};
pub use process::spawn_service;
pub use service_config::Config as ServiceConfig;
pub use service_state::{ServiceSettings, State as ServiceState, StateSetupError};
pub use state::{AppConfig, AppState, StateError};
