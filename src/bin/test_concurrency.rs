use banking_stage_store::{
    config::Config,
    ingest::{BatchConfig, IngestPipeline},
    models::{BlockFields, ObservationEvent, TransactionFields},
    state::AppState,
};
use chrono::Utc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

const SLOT_BASE: u64 = 9_000_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting concurrent ingest smoke test...");

    let config = Config::from_env();
    let state = AppState::init(config).await?;

    // Clear data left by a previous run
    sqlx::query("DELETE FROM blocks WHERE slot >= ?")
        .bind(SLOT_BASE as i64)
        .execute(&state.db_pool)
        .await?;

    // Test 1: racing partial updates to the same slot
    info!("Test 1: concurrent partial block updates");
    let slot = SLOT_BASE;
    let first = {
        let writer = state.writer.clone();
        tokio::spawn(async move {
            writer
                .record_block_observation(slot, BlockFields { total_cu_used: Some(1000), ..Default::default() })
                .await
        })
    };
    let second = {
        let writer = state.writer.clone();
        tokio::spawn(async move {
            writer
                .record_block_observation(slot, BlockFields { successful_transactions: Some(42), ..Default::default() })
                .await
        })
    };
    first.await??;
    second.await??;

    let block = state.store.require_block(slot).await?;
    assert_eq!(block.total_cu_used, Some(1000));
    assert_eq!(block.successful_transactions, Some(42));
    info!("✅ Both partial updates survived");

    // Test 2: pipeline throughput with many keys and duplicate deliveries
    info!("Test 2: pipeline with duplicate deliveries");
    let shutdown = CancellationToken::new();
    let batch_config = BatchConfig {
        max_batch_size: 64,
        flush_interval: Duration::from_millis(100),
        worker_count: 4,
    };
    let pipeline = IngestPipeline::spawn(state.writer.clone(), batch_config, shutdown.clone());

    let start = Instant::now();
    let transactions = 2_000u64;
    for i in 0..transactions {
        let signature = format!("{:A>88}", i);
        let event = ObservationEvent::Transaction {
            signature: signature.replace('0', "z"),
            first_notification_slot: SLOT_BASE + i % 50,
            fields: TransactionFields {
                utc_timestamp: Some(Utc::now()),
                cu_requested: Some(200_000),
                ..Default::default()
            },
        };
        // deliver every event twice
        pipeline.send(event.clone()).await?;
        pipeline.send(event).await?;
    }
    pipeline.close().await;

    let stored: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM transaction_infos WHERE first_notification_slot >= ?",
    )
    .bind(SLOT_BASE as i64)
    .fetch_one(&state.db_pool)
    .await?;

    info!(
        "✅ Stored {} distinct transactions from {} deliveries in {:?}",
        stored,
        transactions * 2,
        start.elapsed()
    );

    sqlx::query("DELETE FROM transaction_infos WHERE first_notification_slot >= ?")
        .bind(SLOT_BASE as i64)
        .execute(&state.db_pool)
        .await?;

    info!("All concurrency checks completed");
    Ok(())
}
