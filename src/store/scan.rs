//! Lazy, restartable range scans.
//!
//! A scan is a description of a range plus a keyset cursor. Every call to
//! `stream()` starts again from the scan's starting cursor and pulls one page
//! at a time, so nothing is read until the stream is polled and a consumer
//! can pick up after the last key it saw with `resume_after`.

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, TryStreamExt};
use sqlx::SqlitePool;
use std::ops::RangeInclusive;
use crate::db::{block, transaction};
use crate::error::StoreError;
use crate::models::{BlockRecord, TimeCursor, TransactionRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPage {
    pub records: Vec<TransactionRecord>,
    /// Cursor for the following page; `None` once the range is exhausted.
    pub next: Option<TimeCursor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPage {
    pub records: Vec<BlockRecord>,
    pub next: Option<u64>,
}

/// Transactions with `start <= utc_timestamp <= end`, in time order.
#[derive(Clone)]
pub struct TimeRangeScan {
    pool: SqlitePool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    page_size: u32,
    after: Option<TimeCursor>,
}

impl TimeRangeScan {
    pub(crate) fn new(pool: SqlitePool, start: DateTime<Utc>, end: DateTime<Utc>, page_size: u32) -> Self {
        Self {
            pool,
            start,
            end,
            page_size: page_size.max(1),
            after: None,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Starts the scan strictly after `cursor`.
    pub fn resume_after(mut self, cursor: TimeCursor) -> Self {
        self.after = Some(cursor);
        self
    }

    pub async fn next_page(&self, after: Option<&TimeCursor>) -> Result<TransactionPage, StoreError> {
        if self.start > self.end {
            return Ok(TransactionPage { records: Vec::new(), next: None });
        }

        let records = transaction::get_transactions_in_time_range(
            &self.pool,
            self.start,
            self.end,
            after,
            self.page_size,
        )
        .await?;

        let next = if records.len() == self.page_size as usize {
            records.last().map(TransactionRecord::cursor)
        } else {
            None
        };

        Ok(TransactionPage { records, next })
    }

    pub fn stream(&self) -> impl Stream<Item = Result<TransactionRecord, StoreError>> + Send + '_ {
        stream::try_unfold(Some(self.after.clone()), move |cursor| async move {
            let Some(after) = cursor else {
                return Ok::<_, StoreError>(None);
            };
            let page = self.next_page(after.as_ref()).await?;
            let next = page.next.map(Some);
            Ok(Some((stream::iter(page.records.into_iter().map(Ok::<_, StoreError>)), next)))
        })
        .try_flatten()
    }

    pub async fn collect(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        self.stream().try_collect().await
    }
}

/// Blocks in a slot range with `banking_stage_errors > 0`, in slot order.
#[derive(Clone)]
pub struct BlockErrorScan {
    pool: SqlitePool,
    slots: RangeInclusive<u64>,
    page_size: u32,
    after: Option<u64>,
}

impl BlockErrorScan {
    pub(crate) fn new(pool: SqlitePool, slots: RangeInclusive<u64>, page_size: u32) -> Self {
        Self {
            pool,
            slots,
            page_size: page_size.max(1),
            after: None,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn resume_after(mut self, slot: u64) -> Self {
        self.after = Some(slot);
        self
    }

    pub async fn next_page(&self, after: Option<u64>) -> Result<BlockPage, StoreError> {
        let records = block::get_blocks_with_errors(&self.pool, &self.slots, after, self.page_size).await?;

        let next = if records.len() == self.page_size as usize {
            records.last().map(|block| block.slot)
        } else {
            None
        };

        Ok(BlockPage { records, next })
    }

    pub fn stream(&self) -> impl Stream<Item = Result<BlockRecord, StoreError>> + Send + '_ {
        stream::try_unfold(Some(self.after), move |cursor| async move {
            let Some(after) = cursor else {
                return Ok::<_, StoreError>(None);
            };
            let page = self.next_page(after).await?;
            let next = page.next.map(Some);
            Ok(Some((stream::iter(page.records.into_iter().map(Ok::<_, StoreError>)), next)))
        })
        .try_flatten()
    }

    pub async fn collect(&self) -> Result<Vec<BlockRecord>, StoreError> {
        self.stream().try_collect().await
    }
}
