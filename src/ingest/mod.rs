pub mod batch_manager;
pub mod worker_pool;
pub mod writer;

// Re-exports for convenience
pub use batch_manager::{BatchConfig, BatchManager};
pub use worker_pool::WorkerPool;
pub use writer::{ConflictPolicy, IngestWriter, WriteOutcome};

use crate::models::ObservationEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Upstream-facing entry point: events sent here are batched, coalesced and
/// written by the worker pool.
pub struct IngestPipeline {
    sender: mpsc::Sender<ObservationEvent>,
    handle: JoinHandle<()>,
}

impl IngestPipeline {
    pub fn spawn(writer: Arc<IngestWriter>, config: BatchConfig, shutdown: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::channel(config.max_batch_size.max(1) * 4);
        let policy = writer.policy();
        let pool = WorkerPool::new(writer, config.worker_count);
        let manager = BatchManager::new(config, policy, pool, receiver);
        let handle = tokio::spawn(manager.start(shutdown));

        Self { sender, handle }
    }

    pub async fn send(&self, event: ObservationEvent) -> Result<(), mpsc::error::SendError<ObservationEvent>> {
        self.sender.send(event).await
    }

    pub fn sender(&self) -> mpsc::Sender<ObservationEvent> {
        self.sender.clone()
    }

    /// Stops accepting events and waits until everything sent so far is written.
    /// Clones handed out by [`IngestPipeline::sender`] must be dropped first.
    pub async fn close(self) {
        drop(self.sender);
        if let Err(e) = self.handle.await {
            error!("Ingest pipeline task failed: {}", e);
        }
    }
}
