pub mod keys;
pub mod records;

pub use keys::CacheKey;
pub use records::{CachedRecord, RecordCache};

use crate::config::Config;

pub fn init_cache(config: &Config) -> RecordCache {
    RecordCache::new(config.cache_max_capacity, config.cache_ttl)
}
