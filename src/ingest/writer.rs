use chrono::Utc;
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, warn};
use crate::cache::{CacheKey, RecordCache};
use crate::db::block::{self, BlockWrite};
use crate::db::transaction::{self, TransactionWrite};
use crate::error::StoreError;
use crate::metrics;
use crate::models::{BlockFields, ObservationEvent, TransactionFields, TransactionKey};
use crate::retry::{with_retry, RetryPolicy};

/// What to do when an observation tries to change a set-once field
/// (`utc_timestamp`, `block_hash`, `leader_identity`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Keep the stored value, merge the remaining fields and log.
    #[default]
    Ignore,
    /// Roll the whole observation back and return `StoreError::Conflict`.
    Reject,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ignore" => Ok(ConflictPolicy::Ignore),
            "reject" => Ok(ConflictPolicy::Reject),
            other => Err(format!("Invalid conflict policy: {}. Must be 'ignore' or 'reject'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Merged,
    /// Merged, except for the named set-once field which kept its stored value.
    ConflictIgnored(&'static str),
}

/// Persists upstream observations with field-level merge semantics.
#[derive(Clone)]
pub struct IngestWriter {
    pool: SqlitePool,
    cache: RecordCache,
    policy: ConflictPolicy,
    retry: RetryPolicy,
}

impl IngestWriter {
    pub fn new(pool: SqlitePool, cache: RecordCache, policy: ConflictPolicy, retry: RetryPolicy) -> Self {
        Self {
            pool,
            cache,
            policy,
            retry,
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    pub async fn record_transaction_observation(
        &self,
        signature: &str,
        first_notification_slot: u64,
        fields: TransactionFields,
    ) -> Result<WriteOutcome, StoreError> {
        let key = TransactionKey::new(signature, first_notification_slot);
        let write = TransactionWrite::new(key, fields, Utc::now())
            .inspect_err(|_| metrics::record_validation_reject("transaction"))?;

        let conflict = with_retry(&self.retry, "transaction upsert", || {
            transaction::upsert_transaction(&self.pool, &write, self.policy)
        })
        .await
        .inspect_err(|e| record_failure("transaction", e))?;
        metrics::record_transaction_written();

        self.cache.invalidate(&CacheKey::transaction(&write.key)).await;
        debug!("Recorded transaction observation {}", write.key);
        Ok(outcome(&write.key.to_string(), conflict))
    }

    pub async fn record_block_observation(
        &self,
        slot: u64,
        fields: BlockFields,
    ) -> Result<WriteOutcome, StoreError> {
        let banking_stage_errors = fields.banking_stage_errors;
        let write = BlockWrite::new(slot, fields).inspect_err(|_| metrics::record_validation_reject("block"))?;

        let result = with_retry(&self.retry, "block upsert", || {
            block::upsert_block(&self.pool, &write, self.policy)
        })
        .await
        .inspect_err(|e| record_failure("block", e))?;
        metrics::record_block_written(banking_stage_errors);

        self.cache.invalidate(&CacheKey::block(slot)).await;
        if !result.cu_within_budget {
            warn!("Block {} uses more compute units than requested", slot);
        }
        debug!("Recorded block observation for slot {}", slot);
        Ok(outcome(&format!("slot {}", slot), result.conflict))
    }

    pub async fn apply(&self, event: ObservationEvent) -> Result<WriteOutcome, StoreError> {
        match event {
            ObservationEvent::Transaction {
                signature,
                first_notification_slot,
                fields,
            } => {
                self.record_transaction_observation(&signature, first_notification_slot, fields)
                    .await
            }
            ObservationEvent::Block { slot, fields } => self.record_block_observation(slot, fields).await,
        }
    }
}

fn record_failure(kind: &'static str, error: &StoreError) {
    match error {
        StoreError::Conflict { field, .. } => metrics::record_conflict(field, "rejected"),
        _ => metrics::record_write_failure(kind),
    }
}

fn outcome(key: &str, conflict: Option<&'static str>) -> WriteOutcome {
    match conflict {
        Some(field) => {
            warn!("Ignored conflicting {} for {}: stored value kept", field, key);
            metrics::record_conflict(field, "ignored");
            WriteOutcome::ConflictIgnored(field)
        }
        None => WriteOutcome::Merged,
    }
}
