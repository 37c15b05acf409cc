use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Sqlite};
use crate::db::{column_opt_u64, column_u64, micros_to_timestamp, timestamp_to_micros};
use crate::error::StoreError;
use crate::ingest::writer::ConflictPolicy;
use crate::models::{TimeCursor, TransactionFields, TransactionKey, TransactionRecord};
use crate::validation::{validate_integer, validate_optional_integer, validate_transaction_observation};

/// A transaction observation that passed validation and is ready to bind.
#[derive(Debug, Clone)]
pub struct TransactionWrite {
    pub key: TransactionKey,
    first_notification_slot: i64,
    errors: Option<String>,
    is_executed: Option<bool>,
    is_confirmed: Option<bool>,
    cu_requested: Option<i64>,
    prioritization_fees: Option<i64>,
    utc_timestamp: Option<i64>,
    /// Used as `utc_timestamp` when the row is new and none was observed.
    observed_at: i64,
    accounts_used: Option<String>,
    processed_slot: Option<i64>,
    supp_infos: Option<String>,
}

impl TransactionWrite {
    pub fn new(
        key: TransactionKey,
        fields: TransactionFields,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        validate_transaction_observation(&key.signature, key.first_notification_slot, &fields)?;
        let first_notification_slot =
            validate_integer("first_notification_slot", key.first_notification_slot)?;

        Ok(Self {
            first_notification_slot,
            cu_requested: validate_optional_integer("cu_requested", fields.cu_requested)?,
            prioritization_fees: validate_optional_integer(
                "prioritization_fees",
                fields.prioritization_fees,
            )?,
            processed_slot: validate_optional_integer("processed_slot", fields.processed_slot)?,
            utc_timestamp: fields.utc_timestamp.map(timestamp_to_micros),
            observed_at: timestamp_to_micros(observed_at),
            errors: fields.errors,
            is_executed: fields.is_executed,
            is_confirmed: fields.is_confirmed,
            accounts_used: fields.accounts_used,
            supp_infos: fields.supp_infos,
            key,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    signature: String,
    first_notification_slot: i64,
    errors: Option<String>,
    is_executed: Option<bool>,
    is_confirmed: Option<bool>,
    cu_requested: Option<i64>,
    prioritization_fees: Option<i64>,
    utc_timestamp: i64,
    accounts_used: Option<String>,
    processed_slot: Option<i64>,
    supp_infos: Option<String>,
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(TransactionRecord {
            first_notification_slot: column_u64("first_notification_slot", row.first_notification_slot)?,
            cu_requested: column_opt_u64("cu_requested", row.cu_requested)?,
            prioritization_fees: column_opt_u64("prioritization_fees", row.prioritization_fees)?,
            utc_timestamp: micros_to_timestamp(row.utc_timestamp)?,
            processed_slot: column_opt_u64("processed_slot", row.processed_slot)?,
            signature: row.signature,
            errors: row.errors,
            is_executed: row.is_executed,
            is_confirmed: row.is_confirmed,
            accounts_used: row.accounts_used,
            supp_infos: row.supp_infos,
        })
    }
}

// Every mutable column takes the incoming value only when one was observed.
// utc_timestamp is set once, except that an observed value replaces one
// derived from the arrival time.
const UPSERT_TRANSACTION: &str = r#"
INSERT INTO transaction_infos
    (signature, first_notification_slot, errors, is_executed, is_confirmed, cu_requested,
     prioritization_fees, utc_timestamp, utc_timestamp_derived, accounts_used, processed_slot,
     supp_infos)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(signature, first_notification_slot) DO UPDATE SET
    errors = COALESCE(excluded.errors, transaction_infos.errors),
    is_executed = COALESCE(excluded.is_executed, transaction_infos.is_executed),
    is_confirmed = COALESCE(excluded.is_confirmed, transaction_infos.is_confirmed),
    cu_requested = COALESCE(excluded.cu_requested, transaction_infos.cu_requested),
    prioritization_fees = COALESCE(excluded.prioritization_fees, transaction_infos.prioritization_fees),
    utc_timestamp = CASE
        WHEN transaction_infos.utc_timestamp_derived AND NOT excluded.utc_timestamp_derived
            THEN excluded.utc_timestamp
        ELSE transaction_infos.utc_timestamp
    END,
    utc_timestamp_derived = transaction_infos.utc_timestamp_derived AND excluded.utc_timestamp_derived,
    accounts_used = COALESCE(excluded.accounts_used, transaction_infos.accounts_used),
    processed_slot = COALESCE(excluded.processed_slot, transaction_infos.processed_slot),
    supp_infos = COALESCE(excluded.supp_infos, transaction_infos.supp_infos)
RETURNING utc_timestamp
"#;

/// Inserts or merges one observation. Returns the immutable field the
/// observation disagreed with, if any (only possible under `Ignore`).
pub async fn upsert_transaction(
    pool: &Pool<Sqlite>,
    write: &TransactionWrite,
    policy: ConflictPolicy,
) -> Result<Option<&'static str>, StoreError> {
    let mut tx = pool.begin().await?;

    let stored_timestamp: i64 = sqlx::query_scalar(UPSERT_TRANSACTION)
        .bind(&write.key.signature)
        .bind(write.first_notification_slot)
        .bind(&write.errors)
        .bind(write.is_executed)
        .bind(write.is_confirmed)
        .bind(write.cu_requested)
        .bind(write.prioritization_fees)
        .bind(write.utc_timestamp.unwrap_or(write.observed_at))
        .bind(write.utc_timestamp.is_none())
        .bind(&write.accounts_used)
        .bind(write.processed_slot)
        .bind(&write.supp_infos)
        .fetch_one(&mut *tx)
        .await?;

    let conflict = match write.utc_timestamp {
        Some(observed) if observed != stored_timestamp => Some("utc_timestamp"),
        _ => None,
    };

    if let (Some(field), ConflictPolicy::Reject) = (conflict, policy) {
        tx.rollback().await?;
        return Err(StoreError::Conflict {
            key: write.key.to_string(),
            field,
        });
    }

    tx.commit().await?;
    Ok(conflict)
}

pub async fn get_transaction(
    pool: &Pool<Sqlite>,
    key: &TransactionKey,
) -> Result<Option<TransactionRecord>, StoreError> {
    let slot = validate_integer("first_notification_slot", key.first_notification_slot)?;

    let row = sqlx::query_as::<_, TransactionRow>(
        r#"SELECT signature, first_notification_slot, errors, is_executed, is_confirmed,
                  cu_requested, prioritization_fees, utc_timestamp, accounts_used,
                  processed_slot, supp_infos
           FROM transaction_infos
           WHERE signature = ? AND first_notification_slot = ?"#,
    )
    .bind(&key.signature)
    .bind(slot)
    .fetch_optional(pool)
    .await?;

    row.map(TransactionRecord::try_from).transpose()
}

/// One keyset page of transactions with `start <= utc_timestamp <= end`,
/// ordered by (utc_timestamp, signature, first_notification_slot) and strictly
/// after `after` when given.
pub async fn get_transactions_in_time_range(
    pool: &Pool<Sqlite>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    after: Option<&TimeCursor>,
    limit: u32,
) -> Result<Vec<TransactionRecord>, StoreError> {
    let rows = match after {
        None => {
            sqlx::query_as::<_, TransactionRow>(
                r#"SELECT signature, first_notification_slot, errors, is_executed, is_confirmed,
                          cu_requested, prioritization_fees, utc_timestamp, accounts_used,
                          processed_slot, supp_infos
                   FROM transaction_infos INDEXED BY idx_transaction_infos_utc_timestamp
                   WHERE utc_timestamp >= ? AND utc_timestamp <= ?
                   ORDER BY utc_timestamp, signature, first_notification_slot
                   LIMIT ?"#,
            )
            .bind(timestamp_to_micros(start))
            .bind(timestamp_to_micros(end))
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        Some(cursor) => {
            let cursor_slot =
                validate_integer("first_notification_slot", cursor.key.first_notification_slot)?;
            sqlx::query_as::<_, TransactionRow>(
                r#"SELECT signature, first_notification_slot, errors, is_executed, is_confirmed,
                          cu_requested, prioritization_fees, utc_timestamp, accounts_used,
                          processed_slot, supp_infos
                   FROM transaction_infos INDEXED BY idx_transaction_infos_utc_timestamp
                   WHERE utc_timestamp >= ? AND utc_timestamp <= ?
                     AND (utc_timestamp, signature, first_notification_slot) > (?, ?, ?)
                   ORDER BY utc_timestamp, signature, first_notification_slot
                   LIMIT ?"#,
            )
            .bind(timestamp_to_micros(start))
            .bind(timestamp_to_micros(end))
            .bind(timestamp_to_micros(cursor.utc_timestamp))
            .bind(&cursor.key.signature)
            .bind(cursor_slot)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    rows.into_iter().map(TransactionRecord::try_from).collect()
}

pub async fn count_transactions(pool: &Pool<Sqlite>) -> Result<i64, StoreError> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM transaction_infos")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
