// SQLite connection pool set up for one writer and many concurrent readers,
// with the schema migrated before the pool is handed out.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::info;
use crate::config::Config;
use crate::db::migration::run_migrations;

pub async fn establish_connection(config: &Config) -> Result<Pool<Sqlite>, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        // WAL keeps readers off the writer's lock
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(config.db_busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect_with(options)
        .await?;

    info!("Connected to {}", config.database_url);

    run_migrations(&pool).await?;

    Ok(pool)
}
