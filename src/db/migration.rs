use sqlx::SqlitePool;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use crate::db::{
    block_index_ddl, block_table_ddl, transaction_index_ddl, transaction_table_ddl, BLOCKS_TABLE,
    TRANSACTIONS_TABLE,
};

pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: String,
}

const CLUSTER_BOOKKEEPING: &str = r#"
CREATE TABLE IF NOT EXISTS cluster_progress (
    table_name TEXT PRIMARY KEY,
    -- JSON array holding the last copied key, NULL before the first batch
    last_key TEXT,
    copied_rows INTEGER NOT NULL DEFAULT 0,
    started_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cluster_history (
    table_name TEXT NOT NULL,
    completed_at INTEGER NOT NULL,
    row_count INTEGER NOT NULL
);
"#;

pub fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "create banking stage tables",
            sql: [
                transaction_table_ddl(TRANSACTIONS_TABLE),
                transaction_index_ddl(TRANSACTIONS_TABLE),
                block_table_ddl(BLOCKS_TABLE),
                block_index_ddl(BLOCKS_TABLE),
            ]
            .concat(),
        },
        Migration {
            version: 2,
            description: "cluster maintenance bookkeeping",
            sql: CLUSTER_BOOKKEEPING.to_string(),
        },
    ]
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    info!("Running database migrations...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await?;

    for migration in migrations() {
        if applied.contains(&migration.version) {
            debug!("Migration {} already applied", migration.version);
            continue;
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(&migration.sql).execute(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?, ?, ?)",
        )
        .bind(migration.version)
        .bind(migration.description)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!("Applied migration {}: {}", migration.version, migration.description);
    }

    info!("Database migrations completed successfully");
    Ok(())
}
