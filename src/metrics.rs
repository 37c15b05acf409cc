//! Ingest and maintenance metrics, recorded through the `metrics` facade and
//! exported in Prometheus format when `METRICS_ADDR` is set.
//!
//! Names follow `bankingstage_{name}`; counters carry a `_total` suffix.

use metrics::{counter, gauge};

const EVENTS_RECEIVED: &str = "bankingstage_events_received_total";
const VALIDATION_REJECTS: &str = "bankingstage_validation_rejects_total";
const TRANSACTIONS_WRITTEN: &str = "bankingstage_transactions_written_total";
const BLOCKS_WRITTEN: &str = "bankingstage_blocks_written_total";
const BLOCK_BANKING_ERRORS: &str = "bankingstage_block_banking_errors";
const SET_ONCE_CONFLICTS: &str = "bankingstage_set_once_conflicts_total";
const WRITE_FAILURES: &str = "bankingstage_write_failures_total";
const CLUSTER_PASSES: &str = "bankingstage_cluster_passes_total";
const CLUSTER_ROWS: &str = "bankingstage_cluster_rows_total";

/// An observation arrived at the batch manager. `kind` is `transaction` or `block`.
#[inline]
pub fn record_event_received(kind: &'static str) {
    counter!(EVENTS_RECEIVED, "kind" => kind).increment(1);
}

#[inline]
pub fn record_validation_reject(kind: &'static str) {
    counter!(VALIDATION_REJECTS, "kind" => kind).increment(1);
}

#[inline]
pub fn record_transaction_written() {
    counter!(TRANSACTIONS_WRITTEN).increment(1);
}

/// Counts the block write and publishes its banking-stage error count, when known.
#[inline]
pub fn record_block_written(banking_stage_errors: Option<u64>) {
    counter!(BLOCKS_WRITTEN).increment(1);
    if let Some(errors) = banking_stage_errors {
        gauge!(BLOCK_BANKING_ERRORS).set(errors as f64);
    }
}

/// `bankingstage_set_once_conflicts_total{field, outcome}`, outcome is
/// `ignored` or `rejected`.
#[inline]
pub fn record_conflict(field: &'static str, outcome: &'static str) {
    counter!(SET_ONCE_CONFLICTS, "field" => field, "outcome" => outcome).increment(1);
}

#[inline]
pub fn record_write_failure(kind: &'static str) {
    counter!(WRITE_FAILURES, "kind" => kind).increment(1);
}

/// `outcome` is `completed`, `interrupted` or `failed`.
#[inline]
pub fn record_cluster_pass(table: &'static str, outcome: &'static str, rows: i64) {
    counter!(CLUSTER_PASSES, "table" => table, "outcome" => outcome).increment(1);
    if rows > 0 {
        counter!(CLUSTER_ROWS, "table" => table).increment(rows as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn test_metrics_dont_panic() {
        // no recorder installed
        record_event_received("block");
        record_validation_reject("transaction");
        record_block_written(Some(3));
        record_conflict("utc_timestamp", "ignored");
        record_cluster_pass("blocks", "completed", 10);
    }

    #[test]
    fn test_metrics_render_in_prometheus_format() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_event_received("transaction");
            record_event_received("transaction");
            record_block_written(Some(4));
            record_conflict("block_hash", "rejected");
            record_cluster_pass("transaction_infos", "completed", 7);
        });

        let rendered = handle.render();
        assert!(rendered.contains("bankingstage_events_received_total{kind=\"transaction\"} 2"));
        assert!(rendered.contains("bankingstage_blocks_written_total 1"));
        assert!(rendered.contains("bankingstage_block_banking_errors 4"));
        assert!(rendered.contains("field=\"block_hash\""));
        assert!(rendered.contains("bankingstage_cluster_rows_total{table=\"transaction_infos\"} 7"));
    }
}
