//! Physical reorganisation of a table by its access-pattern order.
//!
//! SQLite lays rows out in rowid order, so a table is clustered by re-inserting
//! its rows in the desired order into a shadow table and swapping it in. The
//! pass is split into short batches whose cursor is persisted in
//! `cluster_progress`; an interrupted pass resumes where it stopped. Triggers
//! record every key touched while the copy runs so the final swap can replay
//! those rows from the live table.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Executor, Pool, Row, Sqlite};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use crate::db::{
    block_index_ddl, block_table_ddl, transaction_index_ddl, transaction_table_ddl, BLOCKS_TABLE,
    BLOCK_COLUMNS, TRANSACTIONS_TABLE, TRANSACTION_COLUMNS,
};
use crate::error::StoreError;
use crate::retry::{with_retry, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Integer,
    Text,
}

#[derive(Debug, Clone, Copy)]
pub struct KeyColumn {
    pub name: &'static str,
    pub kind: KeyKind,
}

/// A table that can be clustered, with the order to cluster it by.
#[derive(Debug, Clone, Copy)]
pub struct ClusterTarget {
    pub table: &'static str,
    pub columns: &'static str,
    /// Unique per row; defines the physical order. Rows whose key changes
    /// during a pass are caught by the change log.
    pub order_key: &'static [KeyColumn],
    pub primary_key: &'static [&'static str],
    pub table_ddl: fn(&str) -> String,
    pub index_ddl: fn(&str) -> String,
}

pub const TRANSACTIONS: ClusterTarget = ClusterTarget {
    table: TRANSACTIONS_TABLE,
    columns: TRANSACTION_COLUMNS,
    order_key: &[
        KeyColumn { name: "utc_timestamp", kind: KeyKind::Integer },
        KeyColumn { name: "signature", kind: KeyKind::Text },
        KeyColumn { name: "first_notification_slot", kind: KeyKind::Integer },
    ],
    primary_key: &["signature", "first_notification_slot"],
    table_ddl: transaction_table_ddl,
    index_ddl: transaction_index_ddl,
};

pub const BLOCKS: ClusterTarget = ClusterTarget {
    table: BLOCKS_TABLE,
    columns: BLOCK_COLUMNS,
    order_key: &[KeyColumn { name: "slot", kind: KeyKind::Integer }],
    primary_key: &["slot"],
    table_ddl: block_table_ddl,
    index_ddl: block_index_ddl,
};

impl ClusterTarget {
    fn shadow(&self) -> String {
        format!("{}_clustered", self.table)
    }

    fn changes(&self) -> String {
        format!("{}_cluster_changes", self.table)
    }

    fn order_columns(&self) -> String {
        self.order_key
            .iter()
            .map(|column| column.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn order_placeholders(&self) -> String {
        vec!["?"; self.order_key.len()].join(", ")
    }

    fn primary_columns(&self) -> String {
        self.primary_key.join(", ")
    }

    fn capture_triggers(&self) -> String {
        let changes = self.changes();
        let columns = self.primary_columns();
        let mut sql = String::new();
        for (event, row) in [("INSERT", "NEW"), ("UPDATE", "NEW"), ("DELETE", "OLD")] {
            let values = self
                .primary_key
                .iter()
                .map(|column| format!("{row}.{column}"))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(
                "CREATE TRIGGER IF NOT EXISTS {table}_cluster_capture_{suffix} AFTER {event} ON {table}
                 BEGIN
                     INSERT OR IGNORE INTO {changes} ({columns}) VALUES ({values});
                 END;\n",
                table = self.table,
                suffix = event.to_lowercase(),
            ));
        }
        sql
    }
}

/// One component of a persisted cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Integer(i64),
    Text(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterOptions {
    pub batch_size: u32,
    /// Stop (resumably) after this many batches; `None` runs to completion.
    pub max_batches: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterOutcome {
    Completed { rows: i64 },
    Interrupted { copied_rows: i64 },
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn bind_key<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    key: &[KeyValue],
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for value in key {
        query = match value {
            KeyValue::Integer(v) => query.bind(*v),
            KeyValue::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

fn read_key(target: &ClusterTarget, row: &SqliteRow) -> Result<Vec<KeyValue>, StoreError> {
    target
        .order_key
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            Ok(match column.kind {
                KeyKind::Integer => KeyValue::Integer(row.try_get::<i64, _>(idx)?),
                KeyKind::Text => KeyValue::Text(row.try_get::<String, _>(idx)?),
            })
        })
        .collect()
}

/// Creates the shadow table, change log, capture triggers and progress row.
/// Safe to call again for a pass that is already underway.
async fn begin_pass(pool: Pool<Sqlite>, target: ClusterTarget) -> Result<(), StoreError> {
    let setup = format!(
        "{shadow_ddl}
         CREATE TABLE IF NOT EXISTS {changes} ({columns}, PRIMARY KEY ({columns}));
         {triggers}",
        shadow_ddl = (target.table_ddl)(&target.shadow()),
        changes = target.changes(),
        columns = target.primary_columns(),
        triggers = target.capture_triggers(),
    );

    let mut tx = pool.begin().await?;
    (&mut *tx).execute(sqlx::raw_sql(&setup)).await?;
    sqlx::query(
        "INSERT OR IGNORE INTO cluster_progress (table_name, last_key, copied_rows, started_at)
         VALUES (?, NULL, 0, ?)",
    )
    .bind(target.table)
    .bind(now_secs())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

async fn load_progress(
    pool: &Pool<Sqlite>,
    target: &ClusterTarget,
) -> Result<(Option<Vec<KeyValue>>, i64), StoreError> {
    let (last_key, copied_rows): (Option<String>, i64) = sqlx::query_as(
        "SELECT last_key, copied_rows FROM cluster_progress WHERE table_name = ?",
    )
    .bind(target.table)
    .fetch_one(pool)
    .await?;

    let cursor = last_key.map(|raw| serde_json::from_str(&raw)).transpose()?;
    Ok((cursor, copied_rows))
}

/// Keys of the next batch after `cursor`, in cluster order.
async fn next_batch_keys(
    pool: &Pool<Sqlite>,
    target: &ClusterTarget,
    cursor: Option<&[KeyValue]>,
    batch_size: u32,
) -> Result<Vec<Vec<KeyValue>>, StoreError> {
    let order = target.order_columns();
    let sql = match cursor {
        Some(_) => format!(
            "SELECT {order} FROM {table} WHERE ({order}) > ({params}) ORDER BY {order} LIMIT ?",
            table = target.table,
            params = target.order_placeholders(),
        ),
        None => format!("SELECT {order} FROM {table} ORDER BY {order} LIMIT ?", table = target.table),
    };

    let query = bind_key(sqlx::query(&sql), cursor.unwrap_or_default()).bind(batch_size);
    let rows = query.fetch_all(pool).await?;
    rows.iter().map(|row| read_key(target, row)).collect()
}

/// Copies rows in `(cursor, upper]` into the shadow table and advances the
/// persisted cursor in the same transaction.
async fn copy_batch(
    pool: Pool<Sqlite>,
    target: ClusterTarget,
    cursor: Option<Vec<KeyValue>>,
    upper: Vec<KeyValue>,
    rows: i64,
) -> Result<(), StoreError> {
    let order = target.order_columns();
    let params = target.order_placeholders();
    let lower_bound = match cursor {
        Some(_) => format!("({order}) > ({params}) AND "),
        None => String::new(),
    };
    let sql = format!(
        "INSERT OR REPLACE INTO {shadow} ({columns})
         SELECT {columns} FROM {table}
         WHERE {lower_bound}({order}) <= ({params})
         ORDER BY {order}",
        shadow = target.shadow(),
        columns = target.columns,
        table = target.table,
    );
    let last_key = serde_json::to_string(&upper)?;

    let mut tx = pool.begin().await?;
    let query = bind_key(sqlx::query(&sql), cursor.as_deref().unwrap_or_default());
    bind_key(query, &upper).execute(&mut *tx).await?;
    sqlx::query(
        "UPDATE cluster_progress SET last_key = ?, copied_rows = copied_rows + ? WHERE table_name = ?",
    )
    .bind(last_key)
    .bind(rows)
    .bind(target.table)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Replays rows touched during the copy, swaps the shadow table in and
/// rebuilds the indexes, all in one transaction.
async fn finish_pass(pool: Pool<Sqlite>, target: ClusterTarget) -> Result<i64, StoreError> {
    let swap = format!(
        "DELETE FROM {shadow} WHERE ({pk}) IN (SELECT {pk} FROM {changes});
         INSERT INTO {shadow} ({columns})
             SELECT {columns} FROM {table}
             WHERE ({pk}) IN (SELECT {pk} FROM {changes})
             ORDER BY {order};
         DROP TABLE {table};
         ALTER TABLE {shadow} RENAME TO {table};
         {indexes}
         DROP TABLE {changes};",
        shadow = target.shadow(),
        changes = target.changes(),
        table = target.table,
        pk = target.primary_columns(),
        columns = target.columns,
        order = target.order_columns(),
        indexes = (target.index_ddl)(target.table),
    );

    let mut tx = pool.begin().await?;
    (&mut *tx).execute(sqlx::raw_sql(&swap)).await?;
    let rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", target.table))
        .fetch_one(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM cluster_progress WHERE table_name = ?")
        .bind(target.table)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO cluster_history (table_name, completed_at, row_count) VALUES (?, ?, ?)")
        .bind(target.table)
        .bind(now_secs())
        .bind(rows)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(rows)
}

/// Runs (or resumes) a cluster pass over `target`. Stops between batches when
/// `cancel` fires or `options.max_batches` is reached; calling again resumes.
pub async fn cluster_table(
    pool: &Pool<Sqlite>,
    target: &ClusterTarget,
    options: ClusterOptions,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<ClusterOutcome, StoreError> {
    // each attempt owns its inputs so the pass can run on a spawned task
    let target = *target;
    with_retry(retry, "cluster setup", || begin_pass(pool.clone(), target)).await?;
    let (mut cursor, mut copied_rows) = load_progress(pool, &target).await?;
    if cursor.is_some() {
        info!("Resuming cluster pass on {} after {} rows", target.table, copied_rows);
    }

    let batch_size = options.batch_size.max(1);
    let mut batches = 0usize;

    loop {
        if cancel.is_cancelled() || options.max_batches.is_some_and(|max| batches >= max) {
            info!("Cluster pass on {} paused after {} rows", target.table, copied_rows);
            return Ok(ClusterOutcome::Interrupted { copied_rows });
        }

        let keys = next_batch_keys(pool, &target, cursor.as_deref(), batch_size).await?;
        let Some(upper) = keys.last() else {
            break;
        };

        let rows = keys.len() as i64;
        with_retry(retry, "cluster batch", || {
            copy_batch(pool.clone(), target, cursor.clone(), upper.clone(), rows)
        })
        .await?;

        copied_rows += rows;
        batches += 1;
        debug!("Clustered {} rows of {} so far", copied_rows, target.table);

        cursor = Some(upper.clone());
        if keys.len() < batch_size as usize {
            break;
        }
    }

    let rows = with_retry(retry, "cluster swap", || finish_pass(pool.clone(), target)).await?;
    info!("Cluster pass on {} completed: {} rows", target.table, rows);
    Ok(ClusterOutcome::Completed { rows })
}

/// Whether a pass over `target` was started and not yet completed.
pub async fn pass_in_progress(pool: &Pool<Sqlite>, target: &ClusterTarget) -> Result<bool, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cluster_progress WHERE table_name = ?")
        .bind(target.table)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

