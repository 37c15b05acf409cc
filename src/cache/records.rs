//! Point-lookup cache implementation using Moka

use std::time::Duration;
use moka::future::Cache;
use crate::models::{BlockRecord, TransactionRecord};
use super::keys::CacheKey;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum CachedRecord {
    Block(BlockRecord),
    Transaction(TransactionRecord),
}

/// Caches found records only; misses always go to the database.
#[derive(Clone)]
pub struct RecordCache {
    cache: Cache<CacheKey, CachedRecord>,
}

impl RecordCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub async fn get_block(&self, slot: u64) -> Option<BlockRecord> {
        let key = CacheKey::block(slot);
        match self.cache.get(&key).await {
            Some(CachedRecord::Block(block)) => {
                debug!("Cache hit for key: {}", key);
                Some(block)
            }
            _ => {
                debug!("Cache miss for key: {}", key);
                None
            }
        }
    }

    pub async fn get_transaction(&self, key: &CacheKey) -> Option<TransactionRecord> {
        match self.cache.get(key).await {
            Some(CachedRecord::Transaction(transaction)) => {
                debug!("Cache hit for key: {}", key);
                Some(transaction)
            }
            _ => {
                debug!("Cache miss for key: {}", key);
                None
            }
        }
    }

    pub async fn insert_block(&self, block: BlockRecord) {
        self.cache
            .insert(CacheKey::block(block.slot), CachedRecord::Block(block))
            .await;
    }

    pub async fn insert_transaction(&self, transaction: TransactionRecord) {
        let key = CacheKey::transaction(&transaction.key());
        self.cache.insert(key, CachedRecord::Transaction(transaction)).await;
    }

    /// Drops the entry for a key that was just written.
    pub async fn invalidate(&self, key: &CacheKey) {
        self.cache.invalidate(key).await;
        debug!("Invalidated cache entry: {}", key);
    }
}
