pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod retry;
pub mod state;
pub mod store;
pub mod validation;

#[cfg(test)]
pub mod tests;

// Re-export specific items for convenience
pub use config::Config;
pub use error::StoreError;
pub use ingest::{ConflictPolicy, IngestPipeline, IngestWriter, WriteOutcome};
pub use models::{
    BlockFields, BlockRecord, ObservationEvent, TransactionFields, TransactionKey, TransactionRecord,
};
pub use state::AppState;
pub use store::AnalyticalStore;
pub use validation::ValidationError;
