use crate::cache::{self, RecordCache};
use crate::config::Config;
use crate::db::connection;
use crate::error::StoreError;
use crate::ingest::IngestWriter;
use crate::retry::RetryPolicy;
use crate::store::AnalyticalStore;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct AppState {
    pub config: Config,
    pub db_pool: SqlitePool,
    pub cache: RecordCache,
    pub writer: Arc<IngestWriter>,
    pub store: AnalyticalStore,
}

impl AppState {
    /// Connects, migrates and wires the writer and the store to one pool and cache.
    pub async fn init(config: Config) -> Result<Arc<Self>, StoreError> {
        let db_pool = connection::establish_connection(&config).await?;
        let cache = cache::init_cache(&config);

        let writer = Arc::new(IngestWriter::new(
            db_pool.clone(),
            cache.clone(),
            config.conflict_policy,
            RetryPolicy::from_config(&config),
        ));
        let store = AnalyticalStore::new(db_pool.clone(), cache.clone(), config.scan_page_size);

        Ok(Arc::new(Self {
            config,
            db_pool,
            cache,
            writer,
            store,
        }))
    }
}
