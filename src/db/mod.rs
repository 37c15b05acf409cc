use chrono::{DateTime, Utc};
use crate::error::StoreError;

pub mod block;
pub mod cluster;
pub mod connection;
pub mod migration;
pub mod transaction;

pub const TRANSACTIONS_TABLE: &str = "transaction_infos";
pub const BLOCKS_TABLE: &str = "blocks";

pub const TRANSACTION_COLUMNS: &str = "signature, first_notification_slot, errors, is_executed, is_confirmed, \
     cu_requested, prioritization_fees, utc_timestamp, utc_timestamp_derived, accounts_used, \
     processed_slot, supp_infos";

pub const BLOCK_COLUMNS: &str = "slot, block_hash, leader_identity, successful_transactions, \
     processed_transactions, banking_stage_errors, total_cu_used, total_cu_requested, \
     heavily_writelocked_accounts, heavily_readlocked_accounts, supp_infos";

// Table and index DDL is parameterised by table name so the cluster pass can
// build an identical shadow table before swapping it in.

pub fn transaction_table_ddl(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    signature TEXT NOT NULL CHECK (length(signature) <= 88),
    first_notification_slot INTEGER NOT NULL CHECK (first_notification_slot >= 0),
    errors TEXT,
    is_executed BOOLEAN,
    is_confirmed BOOLEAN,
    cu_requested INTEGER CHECK (cu_requested >= 0),
    prioritization_fees INTEGER CHECK (prioritization_fees >= 0),
    -- microseconds since the unix epoch, UTC
    utc_timestamp INTEGER NOT NULL,
    -- set while utc_timestamp is the arrival time rather than an observed value
    utc_timestamp_derived BOOLEAN NOT NULL DEFAULT 0,
    accounts_used TEXT,
    processed_slot INTEGER CHECK (processed_slot >= 0),
    supp_infos TEXT,
    PRIMARY KEY (signature, first_notification_slot)
);
"#
    )
}

pub fn transaction_index_ddl(table: &str) -> String {
    format!(
        r#"
CREATE INDEX IF NOT EXISTS idx_{table}_utc_timestamp
    ON {table}(utc_timestamp, signature, first_notification_slot);
"#
    )
}

pub fn block_table_ddl(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    slot INTEGER PRIMARY KEY CHECK (slot >= 0),
    block_hash TEXT CHECK (length(block_hash) <= 44),
    leader_identity TEXT CHECK (length(leader_identity) <= 44),
    successful_transactions INTEGER CHECK (successful_transactions >= 0),
    processed_transactions INTEGER CHECK (processed_transactions >= 0),
    banking_stage_errors INTEGER CHECK (banking_stage_errors >= 0),
    total_cu_used INTEGER CHECK (total_cu_used >= 0),
    total_cu_requested INTEGER CHECK (total_cu_requested >= 0),
    heavily_writelocked_accounts TEXT,
    heavily_readlocked_accounts TEXT,
    supp_infos TEXT
);
"#
    )
}

pub fn block_index_ddl(table: &str) -> String {
    format!(
        r#"
CREATE INDEX IF NOT EXISTS idx_{table}_slot ON {table}(slot);
CREATE INDEX IF NOT EXISTS idx_{table}_with_errors ON {table}(slot) WHERE banking_stage_errors > 0;
"#
    )
}


pub(crate) fn column_u64(column: &'static str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::InvalidRow(format!("{column} is negative: {value}")))
}

pub(crate) fn column_opt_u64(column: &'static str, value: Option<i64>) -> Result<Option<u64>, StoreError> {
    value.map(|v| column_u64(column, v)).transpose()
}

/// Stored precision is one microsecond; anything finer is truncated.
pub(crate) fn timestamp_to_micros(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

pub(crate) fn micros_to_timestamp(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::InvalidRow(format!("utc_timestamp out of range: {micros}")))
}
