use crate::ingest::writer::IngestWriter;
use crate::error::StoreError;
use crate::models::{EventKey, ObservationEvent};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Applies observation batches through the writer. Every key is pinned to one
/// worker, so events for the same key are written in the order they arrive.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
}

struct WorkerHandle {
    id: usize,
    sender: mpsc::Sender<Vec<ObservationEvent>>,
    handle: tokio::task::JoinHandle<()>,
}

impl WorkerPool {
    pub fn new(writer: Arc<IngestWriter>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let mut workers = Vec::with_capacity(worker_count);

        for id in 0..worker_count {
            let (sender, receiver) = mpsc::channel(1000);
            let worker = Worker::new(id, writer.clone(), receiver);
            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            workers.push(WorkerHandle { id, sender, handle });
        }

        Self { workers }
    }

    fn shard_for(&self, key: &EventKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.workers.len() as u64) as usize
    }

    /// Splits a batch by shard and hands each part to its worker.
    pub async fn dispatch(&self, events: Vec<ObservationEvent>) {
        let mut shards: Vec<Vec<ObservationEvent>> = vec![Vec::new(); self.workers.len()];
        for event in events {
            let shard = self.shard_for(&event.key());
            shards[shard].push(event);
        }

        for (worker, batch) in self.workers.iter().zip(shards) {
            if batch.is_empty() {
                continue;
            }
            if let Err(e) = worker.sender.send(batch).await {
                error!("Worker {} is gone, dropped {} events", worker.id, e.0.len());
            }
        }
    }

    /// Closes the channels and waits for every queued batch to be written.
    pub async fn shutdown(self) {
        for worker in self.workers {
            drop(worker.sender);
            if let Err(e) = worker.handle.await {
                error!("Worker {} panicked: {}", worker.id, e);
            }
        }
    }
}

struct Worker {
    id: usize,
    writer: Arc<IngestWriter>,
    receiver: mpsc::Receiver<Vec<ObservationEvent>>,
}

impl Worker {
    fn new(id: usize, writer: Arc<IngestWriter>, receiver: mpsc::Receiver<Vec<ObservationEvent>>) -> Self {
        Self {
            id,
            writer,
            receiver,
        }
    }

    async fn run(mut self) {
        info!("Worker {} started", self.id);

        while let Some(events) = self.receiver.recv().await {
            self.process_batch(events).await;
        }

        info!("Worker {} shutting down", self.id);
    }

    async fn process_batch(&self, events: Vec<ObservationEvent>) {
        let total = events.len();
        let mut failed = 0;

        for event in events {
            match self.writer.apply(event).await {
                Ok(_) => {}
                Err(StoreError::Validation(e)) => {
                    failed += 1;
                    warn!("Worker {} rejected observation: {}", self.id, e);
                }
                Err(e) => {
                    failed += 1;
                    error!("Worker {} failed to write observation: {}", self.id, e);
                }
            }
        }

        debug!("Worker {} processed {} observations ({} failed)", self.id, total, failed);
    }
}
