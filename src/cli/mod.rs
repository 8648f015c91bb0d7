//! CLI command implementations.

pub mod queue;
pub mod serve;
pub mod submit;

use std::sync::Arc;

use vmbench::{Config, Error, JobStore, QueueBackend, RedisQueue, RedisStore, Result, ResultSink};

/// The Redis URL the CLI commands require.
///
/// The in-memory backends only exist within one process; every CLI
/// command talks to another process through Redis, so a missing URL is a
/// configuration error rather than a silent fallback.
pub fn redis_url(config: &Config) -> Result<&str> {
    config.queue.redis_url.as_deref().ok_or_else(|| {
        Error::config(
            "select backend",
            "no redis url configured (set REDIS_URL or queue.redis_url)",
        )
    })
}

/// Open the durable queue named by the config.
pub fn open_queue(config: &Config) -> Result<Arc<dyn QueueBackend>> {
    let queue = RedisQueue::new(redis_url(config)?, &config.queue.name, config.queue.max_size)?;
    Ok(Arc::new(queue))
}

/// Open the job store sharing the queue's Redis instance.
pub fn open_store(config: &Config) -> Result<Arc<RedisStore>> {
    Ok(Arc::new(RedisStore::new(
        redis_url(config)?,
        &config.queue.name,
    )?))
}

/// Split a store handle into the dispatcher's two capabilities.
pub fn store_handles(store: Arc<RedisStore>) -> (Arc<dyn JobStore>, Arc<dyn ResultSink>) {
    (store.clone(), store)
}
