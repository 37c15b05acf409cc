use sqlx::{FromRow, Pool, Sqlite};
use std::ops::RangeInclusive;
use crate::db::{column_opt_u64, column_u64};
use crate::error::StoreError;
use crate::ingest::writer::ConflictPolicy;
use crate::models::{BlockFields, BlockRecord};
use crate::validation::{validate_block_observation, validate_integer, validate_optional_integer};

/// A block observation that passed validation and is ready to bind.
#[derive(Debug, Clone)]
pub struct BlockWrite {
    pub slot: u64,
    slot_value: i64,
    block_hash: Option<String>,
    leader_identity: Option<String>,
    successful_transactions: Option<i64>,
    processed_transactions: Option<i64>,
    banking_stage_errors: Option<i64>,
    total_cu_used: Option<i64>,
    total_cu_requested: Option<i64>,
    heavily_writelocked_accounts: Option<String>,
    heavily_readlocked_accounts: Option<String>,
    supp_infos: Option<String>,
}

impl BlockWrite {
    pub fn new(slot: u64, fields: BlockFields) -> Result<Self, StoreError> {
        validate_block_observation(slot, &fields)?;
        let slot_value = validate_integer("slot", slot)?;

        Ok(Self {
            slot,
            slot_value,
            successful_transactions: validate_optional_integer(
                "successful_transactions",
                fields.successful_transactions,
            )?,
            processed_transactions: validate_optional_integer(
                "processed_transactions",
                fields.processed_transactions,
            )?,
            banking_stage_errors: validate_optional_integer(
                "banking_stage_errors",
                fields.banking_stage_errors,
            )?,
            total_cu_used: validate_optional_integer("total_cu_used", fields.total_cu_used)?,
            total_cu_requested: validate_optional_integer(
                "total_cu_requested",
                fields.total_cu_requested,
            )?,
            block_hash: fields.block_hash,
            leader_identity: fields.leader_identity,
            heavily_writelocked_accounts: fields.heavily_writelocked_accounts,
            heavily_readlocked_accounts: fields.heavily_readlocked_accounts,
            supp_infos: fields.supp_infos,
        })
    }
}

#[derive(Debug, FromRow)]
struct BlockRow {
    slot: i64,
    block_hash: Option<String>,
    leader_identity: Option<String>,
    successful_transactions: Option<i64>,
    processed_transactions: Option<i64>,
    banking_stage_errors: Option<i64>,
    total_cu_used: Option<i64>,
    total_cu_requested: Option<i64>,
    heavily_writelocked_accounts: Option<String>,
    heavily_readlocked_accounts: Option<String>,
    supp_infos: Option<String>,
}

impl TryFrom<BlockRow> for BlockRecord {
    type Error = StoreError;

    fn try_from(row: BlockRow) -> Result<Self, Self::Error> {
        Ok(BlockRecord {
            slot: column_u64("slot", row.slot)?,
            successful_transactions: column_opt_u64("successful_transactions", row.successful_transactions)?,
            processed_transactions: column_opt_u64("processed_transactions", row.processed_transactions)?,
            banking_stage_errors: column_opt_u64("banking_stage_errors", row.banking_stage_errors)?,
            total_cu_used: column_opt_u64("total_cu_used", row.total_cu_used)?,
            total_cu_requested: column_opt_u64("total_cu_requested", row.total_cu_requested)?,
            block_hash: row.block_hash,
            leader_identity: row.leader_identity,
            heavily_writelocked_accounts: row.heavily_writelocked_accounts,
            heavily_readlocked_accounts: row.heavily_readlocked_accounts,
            supp_infos: row.supp_infos,
        })
    }
}

/// What the merged row looks like after an upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockUpsert {
    pub conflict: Option<&'static str>,
    pub cu_within_budget: bool,
}

// block_hash and leader_identity keep the first value written, everything
// else takes the latest observed value.
const UPSERT_BLOCK: &str = r#"
INSERT INTO blocks
    (slot, block_hash, leader_identity, successful_transactions, processed_transactions,
     banking_stage_errors, total_cu_used, total_cu_requested, heavily_writelocked_accounts,
     heavily_readlocked_accounts, supp_infos)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(slot) DO UPDATE SET
    block_hash = COALESCE(blocks.block_hash, excluded.block_hash),
    leader_identity = COALESCE(blocks.leader_identity, excluded.leader_identity),
    successful_transactions = COALESCE(excluded.successful_transactions, blocks.successful_transactions),
    processed_transactions = COALESCE(excluded.processed_transactions, blocks.processed_transactions),
    banking_stage_errors = COALESCE(excluded.banking_stage_errors, blocks.banking_stage_errors),
    total_cu_used = COALESCE(excluded.total_cu_used, blocks.total_cu_used),
    total_cu_requested = COALESCE(excluded.total_cu_requested, blocks.total_cu_requested),
    heavily_writelocked_accounts = COALESCE(excluded.heavily_writelocked_accounts, blocks.heavily_writelocked_accounts),
    heavily_readlocked_accounts = COALESCE(excluded.heavily_readlocked_accounts, blocks.heavily_readlocked_accounts),
    supp_infos = COALESCE(excluded.supp_infos, blocks.supp_infos)
RETURNING block_hash, leader_identity, total_cu_used, total_cu_requested
"#;

pub async fn upsert_block(
    pool: &Pool<Sqlite>,
    write: &BlockWrite,
    policy: ConflictPolicy,
) -> Result<BlockUpsert, StoreError> {
    let mut tx = pool.begin().await?;

    let (stored_hash, stored_leader, cu_used, cu_requested): (
        Option<String>,
        Option<String>,
        Option<i64>,
        Option<i64>,
    ) = sqlx::query_as(UPSERT_BLOCK)
        .bind(write.slot_value)
        .bind(&write.block_hash)
        .bind(&write.leader_identity)
        .bind(write.successful_transactions)
        .bind(write.processed_transactions)
        .bind(write.banking_stage_errors)
        .bind(write.total_cu_used)
        .bind(write.total_cu_requested)
        .bind(&write.heavily_writelocked_accounts)
        .bind(&write.heavily_readlocked_accounts)
        .bind(&write.supp_infos)
        .fetch_one(&mut *tx)
        .await?;

    let conflict = if write.block_hash.is_some() && write.block_hash != stored_hash {
        Some("block_hash")
    } else if write.leader_identity.is_some() && write.leader_identity != stored_leader {
        Some("leader_identity")
    } else {
        None
    };

    if let (Some(field), ConflictPolicy::Reject) = (conflict, policy) {
        tx.rollback().await?;
        return Err(StoreError::Conflict {
            key: format!("slot {}", write.slot),
            field,
        });
    }

    tx.commit().await?;

    let cu_within_budget = match (cu_used, cu_requested) {
        (Some(used), Some(requested)) => used <= requested,
        _ => true,
    };

    Ok(BlockUpsert {
        conflict,
        cu_within_budget,
    })
}

pub async fn get_block(pool: &Pool<Sqlite>, slot: u64) -> Result<Option<BlockRecord>, StoreError> {
    let slot = validate_integer("slot", slot)?;

    let row = sqlx::query_as::<_, BlockRow>(
        r#"SELECT slot, block_hash, leader_identity, successful_transactions,
                  processed_transactions, banking_stage_errors, total_cu_used,
                  total_cu_requested, heavily_writelocked_accounts,
                  heavily_readlocked_accounts, supp_infos
           FROM blocks
           WHERE slot = ?"#,
    )
    .bind(slot)
    .fetch_optional(pool)
    .await?;

    row.map(BlockRecord::try_from).transpose()
}

/// One keyset page of blocks in `slots` with `banking_stage_errors > 0`,
/// ordered by slot, read through the selective index.
pub async fn get_blocks_with_errors(
    pool: &Pool<Sqlite>,
    slots: &RangeInclusive<u64>,
    after: Option<u64>,
    limit: u32,
) -> Result<Vec<BlockRecord>, StoreError> {
    // Slots above i64::MAX cannot be stored, so clamp instead of failing.
    let start = i64::try_from(*slots.start()).unwrap_or(i64::MAX);
    let end = i64::try_from(*slots.end()).unwrap_or(i64::MAX);
    let lower = match after {
        Some(after) => match i64::try_from(after) {
            Ok(after) if after < i64::MAX => start.max(after + 1),
            _ => return Ok(Vec::new()),
        },
        None => start,
    };

    if lower > end || slots.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query_as::<_, BlockRow>(
        r#"SELECT slot, block_hash, leader_identity, successful_transactions,
                  processed_transactions, banking_stage_errors, total_cu_used,
                  total_cu_requested, heavily_writelocked_accounts,
                  heavily_readlocked_accounts, supp_infos
           FROM blocks INDEXED BY idx_blocks_with_errors
           WHERE banking_stage_errors > 0 AND slot >= ? AND slot <= ?
           ORDER BY slot
           LIMIT ?"#,
    )
    .bind(lower)
    .bind(end)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(BlockRecord::try_from).collect()
}

pub async fn count_blocks(pool: &Pool<Sqlite>) -> Result<i64, StoreError> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM blocks")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
