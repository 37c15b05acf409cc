//! Cache key generation for point lookups

use std::fmt;
use crate::models::TransactionKey;

/// A structured cache key that can be converted to a string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Key for a block point lookup
    Block(u64),
    /// Key for a transaction point lookup
    Transaction(TransactionKey),
}

impl CacheKey {
    pub fn block(slot: u64) -> Self {
        Self::Block(slot)
    }

    pub fn transaction(key: &TransactionKey) -> Self {
        Self::Transaction(key.clone())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block(slot) => write!(f, "block:{}", slot),
            Self::Transaction(key) => write!(f, "tx:{}:{}", key.signature, key.first_notification_slot),
        }
    }
}
