//! tests/store_tests.rs - point lookups, range scans and cache coherence on the read path

#[cfg(test)]
mod tests {
    use crate::{
        db::{block, transaction},
        error::StoreError,
        models::{BlockFields, TransactionFields},
        tests::{at, setup, signature, TestContext},
        validation::ValidationError,
    };
    use futures::{StreamExt, TryStreamExt};

    /// Blocks for slots 10..=40; every third slot has no banking-stage errors
    /// and slots divisible by 5 never report the counter at all.
    async fn seed_blocks(ctx: &TestContext) {
        for slot in 10..=40u64 {
            let banking_stage_errors = if slot % 5 == 0 { None } else { Some(slot % 3) };
            ctx.state
                .writer
                .record_block_observation(
                    slot,
                    BlockFields {
                        banking_stage_errors,
                        processed_transactions: Some(slot * 10),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
    }

    fn expected_error_slots(range: std::ops::RangeInclusive<u64>) -> Vec<u64> {
        range.filter(|slot| slot % 5 != 0 && slot % 3 != 0).collect()
    }

    /// Twelve transactions one second apart, with a tie at every even second.
    async fn seed_transactions(ctx: &TestContext) {
        for i in 0..12u64 {
            let offset = (i / 2 * 2) as i64;
            ctx.state
                .writer
                .record_transaction_observation(
                    &signature(100 - i),
                    500 + i,
                    TransactionFields {
                        utc_timestamp: Some(at(offset)),
                        cu_requested: Some(i),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_missing_block_lookup() {
        let ctx = setup().await;

        assert_eq!(ctx.state.store.get_block(999).await.unwrap(), None);
        let err = ctx.state.store.require_block(999).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)), "Expected NotFound, got {:?}", err);
    }

    #[tokio::test]
    async fn test_missing_transaction_lookup() {
        let ctx = setup().await;

        assert_eq!(ctx.state.store.get_transaction(&signature(1), 1).await.unwrap(), None);
        assert!(matches!(
            ctx.state.store.require_transaction(&signature(1), 1).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            ctx.state.store.get_transaction("short", 1).await,
            Err(StoreError::Validation(ValidationError::InvalidSignature(_)))
        ));
    }

    #[tokio::test]
    async fn test_blocks_with_errors_are_exact_across_pages() {
        let ctx = setup().await;
        seed_blocks(&ctx).await;

        let scan = ctx.state.store.list_blocks_with_errors(11..=38).with_page_size(3);
        let slots: Vec<u64> = scan.collect().await.unwrap().into_iter().map(|b| b.slot).collect();

        assert_eq!(slots, expected_error_slots(11..=38));
        assert!(slots.contains(&11) && slots.contains(&38), "Bounds are inclusive");

        let first = scan.next_page(None).await.unwrap();
        assert_eq!(first.records.len(), 3);
        assert_eq!(first.next, Some(first.records[2].slot));

        let resumed: Vec<u64> = scan
            .clone()
            .resume_after(slots[2])
            .collect()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.slot)
            .collect();
        assert_eq!(resumed, slots[3..].to_vec());
    }

    #[tokio::test]
    async fn test_blocks_with_errors_empty_ranges() {
        let ctx = setup().await;
        seed_blocks(&ctx).await;

        let (high, low) = (40u64, 10u64);
        assert!(ctx.state.store.list_blocks_with_errors(high..=low).collect().await.unwrap().is_empty());
        assert!(ctx.state.store.list_blocks_with_errors(100..=200).collect().await.unwrap().is_empty());
        assert!(
            ctx.state.store.list_blocks_with_errors(15..=15).collect().await.unwrap().is_empty(),
            "Slot 15 never reported errors"
        );
        let huge = ctx.state.store.list_blocks_with_errors(0..=u64::MAX).collect().await.unwrap();
        assert_eq!(huge.len(), expected_error_slots(10..=40).len());
    }

    #[tokio::test]
    async fn test_time_range_scan_is_ordered_and_inclusive() {
        let ctx = setup().await;
        seed_transactions(&ctx).await;

        let scan = ctx.state.store.list_transactions_by_time_range(at(2), at(8)).with_page_size(4);
        let records = scan.collect().await.unwrap();

        assert_eq!(records.len(), 8, "Offsets 2, 4, 6 and 8 with two transactions each");
        assert_eq!(records.first().unwrap().utc_timestamp, at(2));
        assert_eq!(records.last().unwrap().utc_timestamp, at(8));
        for pair in records.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(
                (a.utc_timestamp, &a.signature, a.first_notification_slot)
                    < (b.utc_timestamp, &b.signature, b.first_notification_slot),
                "Scan must be strictly ordered"
            );
        }
    }

    #[tokio::test]
    async fn test_time_range_scan_restarts_and_resumes() {
        let ctx = setup().await;
        seed_transactions(&ctx).await;

        let scan = ctx.state.store.list_transactions_by_time_range(at(0), at(100)).with_page_size(5);
        let all = scan.collect().await.unwrap();
        assert_eq!(all.len(), 12);

        // a partially consumed stream does not affect the next one
        let head: Vec<_> = scan.stream().take(3).try_collect().await.unwrap();
        assert_eq!(head, all[..3].to_vec());
        assert_eq!(scan.collect().await.unwrap(), all, "Restarted scan yields the same rows");

        let resumed = scan.clone().resume_after(all[6].cursor()).collect().await.unwrap();
        assert_eq!(resumed, all[7..].to_vec());

        let page = scan.next_page(Some(&all[9].cursor())).await.unwrap();
        assert_eq!(page.records, all[10..].to_vec());
        assert_eq!(page.next, None, "Short page ends the scan");
    }

    #[tokio::test]
    async fn test_inverted_time_range_is_empty() {
        let ctx = setup().await;
        seed_transactions(&ctx).await;

        let scan = ctx.state.store.list_transactions_by_time_range(at(10), at(0));
        assert!(scan.collect().await.unwrap().is_empty());
        assert!(scan.next_page(None).await.unwrap().records.is_empty());
    }

    #[tokio::test]
    async fn test_primary_keys_stay_unique() {
        let ctx = setup().await;
        let sig = signature(3);

        for round in 0..5u64 {
            ctx.state
                .writer
                .record_transaction_observation(
                    &sig,
                    77,
                    TransactionFields { utc_timestamp: Some(at(0)), cu_requested: Some(round), ..Default::default() },
                )
                .await
                .unwrap();
            ctx.state
                .writer
                .record_block_observation(77, BlockFields { total_cu_used: Some(round), ..Default::default() })
                .await
                .unwrap();
        }
        // same signature, different first slot is a different record
        ctx.state
            .writer
            .record_transaction_observation(&sig, 78, TransactionFields::default())
            .await
            .unwrap();

        assert_eq!(transaction::count_transactions(&ctx.state.db_pool).await.unwrap(), 2);
        assert_eq!(block::count_blocks(&ctx.state.db_pool).await.unwrap(), 1);
        assert_eq!(ctx.state.store.require_transaction(&sig, 77).await.unwrap().cu_requested, Some(4));
    }

    #[tokio::test]
    async fn test_cached_lookups_see_later_writes() {
        let ctx = setup().await;
        let writer = &ctx.state.writer;
        let sig = signature(4);

        writer
            .record_block_observation(20, BlockFields { successful_transactions: Some(1), ..Default::default() })
            .await
            .unwrap();
        writer
            .record_transaction_observation(&sig, 20, TransactionFields::default())
            .await
            .unwrap();

        // warm the cache
        assert_eq!(ctx.state.store.require_block(20).await.unwrap().successful_transactions, Some(1));
        assert_eq!(ctx.state.store.require_transaction(&sig, 20).await.unwrap().is_confirmed, None);

        writer
            .record_block_observation(20, BlockFields { successful_transactions: Some(2), ..Default::default() })
            .await
            .unwrap();
        writer
            .record_transaction_observation(&sig, 20, TransactionFields { is_confirmed: Some(true), ..Default::default() })
            .await
            .unwrap();

        assert_eq!(ctx.state.store.require_block(20).await.unwrap().successful_transactions, Some(2));
        assert_eq!(ctx.state.store.require_transaction(&sig, 20).await.unwrap().is_confirmed, Some(true));
    }

    #[tokio::test]
    async fn test_transaction_with_block_tolerates_dangling_slot() {
        let ctx = setup().await;
        let sig = signature(5);

        assert_eq!(ctx.state.store.get_transaction_with_block(&sig, 30).await.unwrap(), None);

        ctx.state
            .writer
            .record_transaction_observation(&sig, 30, TransactionFields { processed_slot: Some(31), ..Default::default() })
            .await
            .unwrap();

        let joined = ctx.state.store.get_transaction_with_block(&sig, 30).await.unwrap().unwrap();
        assert_eq!(joined.transaction.processed_slot, Some(31));
        assert_eq!(joined.block, None, "Block 31 has not been observed yet");

        ctx.state
            .writer
            .record_block_observation(31, BlockFields { banking_stage_errors: Some(1), ..Default::default() })
            .await
            .unwrap();

        let joined = ctx.state.store.get_transaction_with_block(&sig, 30).await.unwrap().unwrap();
        assert_eq!(joined.block.map(|b| b.slot), Some(31));
    }
}
