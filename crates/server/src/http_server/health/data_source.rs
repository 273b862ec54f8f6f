use std::fmt::Debug;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use http::request::Parts;

use crate::database::Database;
use crate::ServiceState;

/// Something the data plane cannot serve requests without.
#[async_trait]
pub trait DataSource {
    async fn is_ready(&self) -> Result<(), DataSourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error("identity store is unavailable")]
    Database,

    #[error("file store root {0:?} is not a directory")]
    FileStore(PathBuf),
}

pub type DynDataSource = Arc<dyn DataSource + Send + Sync>;

pub struct StateDataSource(DynDataSource);

impl Debug for StateDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateDataSource").finish()
    }
}

impl StateDataSource {
    #[cfg(test)]
    pub fn new(dds: DynDataSource) -> Self {
        Self(dds)
    }
}

impl Deref for StateDataSource {
    type Target = DynDataSource;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The identity store answers and the file root exists.
struct ServiceSource {
    db: Database,
    files_root: PathBuf,
}

#[async_trait]
impl DataSource for ServiceSource {
    async fn is_ready(&self) -> Result<(), DataSourceError> {
        sqlx::query("SELECT 1 AS id")
            .fetch_one(&*self.db)
            .await
            .map_err(|e| {
                tracing::warn!("readiness query failed: {}", e);
                DataSourceError::Database
            })?;

        match tokio::fs::metadata(&self.files_root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(DataSourceError::FileStore(self.files_root.clone())),
        }
    }
}

#[async_trait]
impl FromRequestParts<ServiceState> for StateDataSource {
    type Rejection = ();

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        Ok(StateDataSource(Arc::new(ServiceSource {
            db: state.database().clone(),
            files_root: state.files().root().to_path_buf(),
        })))
    }
}
