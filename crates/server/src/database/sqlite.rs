use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use super::DatabaseSetupError;

const MAX_CONNECTIONS: u32 = 8;

pub(super) async fn connect_sqlite(url: &url::Url) -> Result<SqlitePool, DatabaseSetupError> {
    let in_memory = url.as_str().contains(":memory:");

    let mut options = SqliteConnectOptions::from_str(url.as_str())
        .map_err(DatabaseSetupError::Unavailable)?
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));

    // every pooled connection to `:memory:` would otherwise be its own database
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)
    };

    pool_options
        .connect_with(options)
        .await
        .map_err(DatabaseSetupError::Unavailable)
}

pub(super) async fn migrate_sqlite(pool: &SqlitePool) -> Result<(), DatabaseSetupError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(DatabaseSetupError::MigrationFailed)
}
