use crate::config::Config;
use crate::ingest::worker_pool::WorkerPool;
use crate::ingest::writer::ConflictPolicy;
use crate::metrics;
use crate::models::{EventKey, ObservationEvent};
use crate::validation::validate_observation;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub flush_interval: Duration,
    pub worker_count: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            flush_interval: Duration::from_secs(5),
            worker_count: num_cpus::get(),
        }
    }
}

impl BatchConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_batch_size: config.ingest_batch_size,
            flush_interval: config.ingest_flush_interval,
            worker_count: config.ingest_workers,
        }
    }
}

/// Buffers upstream events and coalesces those for the same key before they
/// reach the workers.
///
/// Invalid events are dropped on arrival. Two events for a key are only
/// merged when the stored result cannot differ from writing them in turn:
/// they must agree on every set-once field, and under
/// [`ConflictPolicy::Reject`] neither may carry one, since either could be
/// rolled back on its own. Anything else stays queued as a separate write,
/// in arrival order.
pub struct BatchManager {
    buffer: ObservationBuffer,
    config: BatchConfig,
    policy: ConflictPolicy,
    pool: WorkerPool,
    receiver: mpsc::Receiver<ObservationEvent>,
}

struct ObservationBuffer {
    /// Writes per key, oldest first.
    pending: HashMap<EventKey, Vec<ObservationEvent>>,
    /// Raw events received since the last flush, before coalescing.
    total_size: usize,
    last_flush: Instant,
}

impl BatchManager {
    pub fn new(
        config: BatchConfig,
        policy: ConflictPolicy,
        pool: WorkerPool,
        receiver: mpsc::Receiver<ObservationEvent>,
    ) -> Self {
        Self {
            buffer: ObservationBuffer {
                pending: HashMap::new(),
                total_size: 0,
                last_flush: Instant::now(),
            },
            config,
            policy,
            pool,
            receiver,
        }
    }

    async fn add_event(&mut self, event: ObservationEvent) {
        metrics::record_event_received(event.kind());
        if let Err(e) = validate_observation(&event) {
            warn!("Dropping invalid {} observation: {}", event.kind(), e);
            metrics::record_validation_reject(event.kind());
            return;
        }

        let policy = self.policy;
        let key = event.key();
        let queue = self.buffer.pending.entry(key.clone()).or_default();
        match queue.last_mut() {
            Some(last) if coalesces(policy, last, &event) => {
                last.absorb(event);
                debug!("Coalesced observation for {:?}", key);
            }
            last => {
                if last.is_some() {
                    debug!("Keeping observation for {:?} as a separate write", key);
                }
                queue.push(event);
            }
        }

        self.buffer.total_size += 1;

        if self.should_flush() {
            self.flush().await;
        }
    }

    fn should_flush(&self) -> bool {
        self.buffer.total_size >= self.config.max_batch_size
            || self.buffer.last_flush.elapsed() >= self.config.flush_interval
    }

    async fn flush(&mut self) {
        self.buffer.last_flush = Instant::now();
        if self.buffer.total_size == 0 {
            return;
        }

        let events: Vec<ObservationEvent> = self.buffer.pending.drain().flat_map(|(_, queue)| queue).collect();
        debug!(
            "Flushing {} observations ({} before coalescing) to workers",
            events.len(),
            self.buffer.total_size
        );
        self.buffer.total_size = 0;
        self.pool.dispatch(events).await;
    }

    /// Runs until the input channel closes or `shutdown` fires, then flushes
    /// what is buffered or queued and waits for the workers to drain.
    pub async fn start(mut self, shutdown: CancellationToken) {
        let mut ticker = interval(self.config.flush_interval);

        loop {
            tokio::select! {
                event = self.receiver.recv() => {
                    match event {
                        Some(event) => self.add_event(event).await,
                        None => {
                            info!("Observation channel closed, draining batch manager");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.flush().await;
                }
                _ = shutdown.cancelled() => {
                    info!("Shutting down batch manager");
                    break;
                }
            }
        }

        // events already queued are still written
        self.receiver.close();
        while let Ok(event) = self.receiver.try_recv() {
            self.add_event(event).await;
        }

        self.flush().await;
        self.pool.shutdown().await;
    }
}

fn coalesces(policy: ConflictPolicy, pending: &ObservationEvent, newer: &ObservationEvent) -> bool {
    if pending.conflicts_with(newer).is_some() {
        return false;
    }
    match policy {
        ConflictPolicy::Ignore => true,
        ConflictPolicy::Reject => !pending.has_set_once_fields() && !newer.has_set_once_fields(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockFields, TransactionFields};
    use chrono::{TimeZone, Utc};

    fn transaction(fields: TransactionFields) -> ObservationEvent {
        ObservationEvent::Transaction {
            signature: "1".repeat(88),
            first_notification_slot: 9,
            fields,
        }
    }

    #[test]
    fn coalescing_rules() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t9 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 9).unwrap();
        let plain = transaction(TransactionFields { processed_slot: Some(5), ..Default::default() });
        let stamped = transaction(TransactionFields { utc_timestamp: Some(t0), ..Default::default() });
        let restamped = transaction(TransactionFields { utc_timestamp: Some(t9), ..Default::default() });

        assert!(coalesces(ConflictPolicy::Ignore, &plain, &stamped));
        assert!(!coalesces(ConflictPolicy::Ignore, &stamped, &restamped));
        assert!(coalesces(ConflictPolicy::Reject, &plain, &plain));
        assert!(!coalesces(ConflictPolicy::Reject, &plain, &stamped));
        assert!(!coalesces(ConflictPolicy::Reject, &stamped, &plain));

        let hashed = ObservationEvent::Block {
            slot: 1,
            fields: BlockFields { block_hash: Some("a".into()), ..Default::default() },
        };
        let counted = ObservationEvent::Block {
            slot: 1,
            fields: BlockFields { total_cu_used: Some(3), ..Default::default() },
        };
        assert!(coalesces(ConflictPolicy::Ignore, &hashed, &counted));
        assert!(!coalesces(ConflictPolicy::Reject, &hashed, &counted));
    }
}
