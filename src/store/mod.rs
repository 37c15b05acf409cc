pub mod maintenance;
pub mod scan;

pub use scan::{BlockErrorScan, BlockPage, TimeRangeScan, TransactionPage};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::ops::RangeInclusive;
use crate::cache::{CacheKey, RecordCache};
use crate::db::{block, transaction};
use crate::error::StoreError;
use crate::models::{BlockRecord, TransactionKey, TransactionRecord};
use crate::validation::validate_signature;

/// A transaction together with the block it was processed in, when that block
/// has been observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionWithBlock {
    pub transaction: TransactionRecord,
    pub block: Option<BlockRecord>,
}

/// Read side of the store: point lookups and range scans.
///
/// Point lookups go through the record cache. The writer invalidates a key
/// after each write, but a lookup that read the row just before a write can
/// put the older row back after the invalidation. Such an entry lives until
/// `CACHE_TTL_SECS` expires it, so reads may lag writes by up to that TTL.
#[derive(Clone)]
pub struct AnalyticalStore {
    pool: SqlitePool,
    cache: RecordCache,
    page_size: u32,
}

impl AnalyticalStore {
    pub fn new(pool: SqlitePool, cache: RecordCache, page_size: u32) -> Self {
        Self {
            pool,
            cache,
            page_size: page_size.max(1),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `Ok(None)` when the slot was never observed.
    pub async fn get_block(&self, slot: u64) -> Result<Option<BlockRecord>, StoreError> {
        if let Some(block) = self.cache.get_block(slot).await {
            return Ok(Some(block));
        }

        let block = block::get_block(&self.pool, slot).await?;
        if let Some(block) = &block {
            self.cache.insert_block(block.clone()).await;
        }
        Ok(block)
    }

    pub async fn require_block(&self, slot: u64) -> Result<BlockRecord, StoreError> {
        self.get_block(slot)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("block at slot {}", slot)))
    }

    pub async fn get_transaction(
        &self,
        signature: &str,
        first_notification_slot: u64,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        validate_signature(signature)?;
        let key = TransactionKey::new(signature, first_notification_slot);
        let cache_key = CacheKey::transaction(&key);
        if let Some(transaction) = self.cache.get_transaction(&cache_key).await {
            return Ok(Some(transaction));
        }

        let transaction = transaction::get_transaction(&self.pool, &key).await?;
        if let Some(transaction) = &transaction {
            self.cache.insert_transaction(transaction.clone()).await;
        }
        Ok(transaction)
    }

    pub async fn require_transaction(
        &self,
        signature: &str,
        first_notification_slot: u64,
    ) -> Result<TransactionRecord, StoreError> {
        self.get_transaction(signature, first_notification_slot)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("transaction {}@{}", signature, first_notification_slot))
            })
    }

    /// Resolves the soft reference from a transaction to the block at its
    /// `processed_slot`. A block that has not been observed yet is `None`.
    pub async fn get_transaction_with_block(
        &self,
        signature: &str,
        first_notification_slot: u64,
    ) -> Result<Option<TransactionWithBlock>, StoreError> {
        let Some(transaction) = self.get_transaction(signature, first_notification_slot).await? else {
            return Ok(None);
        };

        let block = match transaction.processed_slot {
            Some(slot) => self.get_block(slot).await?,
            None => None,
        };

        Ok(Some(TransactionWithBlock { transaction, block }))
    }

    pub fn list_blocks_with_errors(&self, slots: RangeInclusive<u64>) -> BlockErrorScan {
        BlockErrorScan::new(self.pool.clone(), slots, self.page_size)
    }

    /// Both bounds are inclusive.
    pub fn list_transactions_by_time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> TimeRangeScan {
        TimeRangeScan::new(self.pool.clone(), start, end, self.page_size)
    }
}
