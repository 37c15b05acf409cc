//! tests/cluster_tests.rs - copy/sort/swap clustering, interruption and resume

#[cfg(test)]
mod tests {
    use crate::{
        db::cluster::{self, ClusterOptions, ClusterOutcome, BLOCKS, TRANSACTIONS},
        models::{BlockFields, TransactionFields},
        retry::RetryPolicy,
        store::maintenance,
        tests::{at, setup, setup_with, signature, TestContext},
    };
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn seed(ctx: &TestContext, count: u64) {
        for i in 0..count {
            // insertion order deliberately differs from time order
            let offset = ((i * 7) % count) as i64;
            ctx.state
                .writer
                .record_transaction_observation(
                    &signature(i),
                    2_000 + i,
                    TransactionFields { utc_timestamp: Some(at(offset)), cu_requested: Some(i), ..Default::default() },
                )
                .await
                .unwrap();
            ctx.state
                .writer
                .record_block_observation(
                    2_000 + (count - i),
                    BlockFields { banking_stage_errors: Some(i % 2), ..Default::default() },
                )
                .await
                .unwrap();
        }
    }

    async fn index_names(ctx: &TestContext, table: &str) -> Vec<String> {
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND sql IS NOT NULL ORDER BY name")
            .bind(table)
            .fetch_all(&ctx.state.db_pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_pass_keeps_rows_and_indexes() {
        let ctx = setup().await;
        seed(&ctx, 20).await;
        let store = &ctx.state.store;

        let before_txs = store.list_transactions_by_time_range(at(0), at(100)).collect().await.unwrap();
        let before_blocks = store.list_blocks_with_errors(0..=u64::MAX).collect().await.unwrap();
        let tx_indexes = index_names(&ctx, "transaction_infos").await;
        let block_indexes = index_names(&ctx, "blocks").await;

        let retry = RetryPolicy::from_config(&ctx.state.config);
        let options = ClusterOptions { batch_size: 3, max_batches: None };
        let cancel = CancellationToken::new();
        let outcome = cluster::cluster_table(&ctx.state.db_pool, &TRANSACTIONS, options, &retry, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, ClusterOutcome::Completed { rows: 20 });
        let outcome = cluster::cluster_table(&ctx.state.db_pool, &BLOCKS, options, &retry, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, ClusterOutcome::Completed { rows: 20 });

        assert_eq!(index_names(&ctx, "transaction_infos").await, tx_indexes);
        assert_eq!(index_names(&ctx, "blocks").await, block_indexes);
        assert!(block_indexes.contains(&"idx_blocks_with_errors".to_string()));

        let after_txs = store.list_transactions_by_time_range(at(0), at(100)).collect().await.unwrap();
        let after_blocks = store.list_blocks_with_errors(0..=u64::MAX).collect().await.unwrap();
        assert_eq!(after_txs, before_txs, "Clustering must not change any row");
        assert_eq!(after_blocks, before_blocks);

        // rows now sit in rowid order matching time order
        let physical: Vec<i64> = sqlx::query_scalar("SELECT utc_timestamp FROM transaction_infos ORDER BY rowid")
            .fetch_all(&ctx.state.db_pool)
            .await
            .unwrap();
        let mut sorted = physical.clone();
        sorted.sort();
        assert_eq!(physical, sorted);

        let leftovers: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE '%_clustered' OR name LIKE '%_cluster_changes'",
        )
        .fetch_one(&ctx.state.db_pool)
        .await
        .unwrap();
        assert_eq!(leftovers, 0, "Shadow and change tables are dropped after the swap");

        let history: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cluster_history")
            .fetch_one(&ctx.state.db_pool)
            .await
            .unwrap();
        assert_eq!(history, 2);
    }

    #[tokio::test]
    async fn test_interrupted_pass_resumes_without_losing_writes() {
        let ctx = setup().await;
        seed(&ctx, 10).await;
        let pool = &ctx.state.db_pool;
        let retry = RetryPolicy::from_config(&ctx.state.config);
        let cancel = CancellationToken::new();

        let outcome = cluster::cluster_table(
            pool,
            &TRANSACTIONS,
            ClusterOptions { batch_size: 4, max_batches: Some(1) },
            &retry,
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(outcome, ClusterOutcome::Interrupted { copied_rows: 4 });
        assert!(cluster::pass_in_progress(pool, &TRANSACTIONS).await.unwrap());

        // writes between batches: update an already copied row, add one
        // before the cursor and one after it
        let copied = signature(0);
        ctx.state
            .writer
            .record_transaction_observation(&copied, 2_000, TransactionFields { is_confirmed: Some(true), ..Default::default() })
            .await
            .unwrap();
        ctx.state
            .writer
            .record_transaction_observation(
                &signature(500),
                1,
                TransactionFields { utc_timestamp: Some(at(-50)), ..Default::default() },
            )
            .await
            .unwrap();
        ctx.state
            .writer
            .record_transaction_observation(
                &signature(501),
                1,
                TransactionFields { utc_timestamp: Some(at(50)), ..Default::default() },
            )
            .await
            .unwrap();

        // cancellation stops before the next batch
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let outcome = cluster::cluster_table(
            pool,
            &TRANSACTIONS,
            ClusterOptions { batch_size: 4, max_batches: None },
            &retry,
            &cancelled,
        )
        .await
        .unwrap();
        assert_eq!(outcome, ClusterOutcome::Interrupted { copied_rows: 4 });

        let outcome = cluster::cluster_table(
            pool,
            &TRANSACTIONS,
            ClusterOptions { batch_size: 4, max_batches: None },
            &retry,
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(outcome, ClusterOutcome::Completed { rows: 12 });
        assert!(!cluster::pass_in_progress(pool, &TRANSACTIONS).await.unwrap());

        let store = &ctx.state.store;
        assert_eq!(store.require_transaction(&copied, 2_000).await.unwrap().is_confirmed, Some(true));
        assert_eq!(store.require_transaction(&signature(500), 1).await.unwrap().utc_timestamp, at(-50));
        assert!(store.get_transaction(&signature(501), 1).await.unwrap().is_some());
        for i in 0..10u64 {
            assert!(
                store.get_transaction(&signature(i), 2_000 + i).await.unwrap().is_some(),
                "Row {} went missing during clustering",
                i
            );
        }
        assert_eq!(
            store.list_transactions_by_time_range(at(-100), at(100)).collect().await.unwrap().len(),
            12
        );
    }

    #[tokio::test]
    async fn test_maintenance_round_covers_both_tables() {
        let ctx = setup().await;
        seed(&ctx, 5).await;

        let outcomes = maintenance::run_cluster_pass(
            &ctx.state,
            ClusterOptions { batch_size: 2, max_batches: None },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcomes,
            vec![
                ("transaction_infos", ClusterOutcome::Completed { rows: 5 }),
                ("blocks", ClusterOutcome::Completed { rows: 5 }),
            ]
        );

        // a second round starts a fresh pass and completes as well
        let again = maintenance::run_cluster_pass(
            &ctx.state,
            ClusterOptions { batch_size: 100, max_batches: None },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(again.iter().all(|(_, outcome)| matches!(outcome, ClusterOutcome::Completed { .. })));
    }

    #[tokio::test]
    async fn test_maintenance_runs_on_a_spawned_task() {
        let ctx = setup_with(|config| {
            config.cluster_interval = Duration::from_millis(50);
            config.cluster_batch_size = 2;
        })
        .await;
        seed(&ctx, 6).await;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(maintenance::run_maintenance(ctx.state.clone(), shutdown.clone()));

        let mut passes = 0i64;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            passes = sqlx::query_scalar("SELECT COUNT(*) FROM cluster_history")
                .fetch_one(&ctx.state.db_pool)
                .await
                .unwrap();
            if passes >= 2 {
                break;
            }
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert!(passes >= 2, "Both tables should have been clustered, got {} passes", passes);
        assert_eq!(
            ctx.state.store.list_transactions_by_time_range(at(0), at(100)).collect().await.unwrap().len(),
            6
        );
    }
}
