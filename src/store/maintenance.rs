use std::sync::Arc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use crate::db::cluster::{self, ClusterOptions, ClusterOutcome, BLOCKS, TRANSACTIONS};
use crate::error::StoreError;
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::state::AppState;

/// One maintenance round: cluster (or continue clustering) both tables.
pub async fn run_cluster_pass(
    state: &AppState,
    options: ClusterOptions,
    cancel: &CancellationToken,
) -> Result<Vec<(&'static str, ClusterOutcome)>, StoreError> {
    let retry = RetryPolicy::from_config(&state.config);
    let mut outcomes = Vec::new();

    for target in [TRANSACTIONS, BLOCKS] {
        let outcome = match cluster::cluster_table(state.store.pool(), &target, options, &retry, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::record_cluster_pass(target.table, "failed", 0);
                return Err(e);
            }
        };
        match outcome {
            ClusterOutcome::Completed { rows } => metrics::record_cluster_pass(target.table, "completed", rows),
            ClusterOutcome::Interrupted { .. } => metrics::record_cluster_pass(target.table, "interrupted", 0),
        }
        let interrupted = matches!(outcome, ClusterOutcome::Interrupted { .. });
        outcomes.push((target.table, outcome));
        if interrupted {
            break;
        }
    }

    Ok(outcomes)
}

/// Runs cluster passes every `cluster_interval` until `shutdown` fires. A pass
/// cut short by shutdown resumes on the next start.
pub async fn run_maintenance(state: Arc<AppState>, shutdown: CancellationToken) {
    info!("Starting cluster maintenance every {:?}", state.config.cluster_interval);

    let options = ClusterOptions {
        batch_size: state.config.cluster_batch_size,
        max_batches: None,
    };
    let mut ticker = interval(state.config.cluster_interval);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_cluster_pass(&state, options, &shutdown).await {
                    Ok(outcomes) => {
                        for (table, outcome) in outcomes {
                            info!("Cluster maintenance on {}: {:?}", table, outcome);
                        }
                    }
                    Err(e) => error!("Cluster maintenance failed: {}", e),
                }
            }
            _ = shutdown.cancelled() => {
                info!("Shutting down cluster maintenance");
                break;
            }
        }
    }
}
