//! The background refresher: periodically force-fetches feeds whose cache
//! entry has gone stale, bounded by a concurrency semaphore, mirroring the
//! teacher's `start_scheduler`/`fetch_all_feeds` loop but replacing its
//! sequential-with-sleep rate limiting with bounded concurrent fetches
//! driven by a [`Semaphore`].

use crate::domain::cached_feed::{self, CachedOpenOptions};
use crate::domain::models::Search;
use crate::domain::registry::Registry;
use crate::infrastructure::clock::Clock;
use crate::infrastructure::store;
use chrono::Duration as ChronoDuration;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy)]
pub struct RefresherOptions {
    pub interval: Duration,
    pub cache_time: ChronoDuration,
    pub per_feed_timeout: Duration,
    pub max_concurrent: usize,
}

impl Default for RefresherOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            cache_time: ChronoDuration::minutes(10),
            per_feed_timeout: Duration::from_secs(10),
            max_concurrent: 4,
        }
    }
}

/// Runs the refresh loop forever. Intended to be spawned as its own task
/// by the host process; a dropped handle simply stops future ticks.
pub async fn run(
    pool: SqlitePool,
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    opts: RefresherOptions,
) {
    let mut ticker = tokio::time::interval(opts.interval);
    loop {
        ticker.tick().await;
        if let Err(err) = refresh_once(&pool, &registry, clock.clone(), &opts).await {
            tracing::error!(error = %err, "refresh cycle failed to list stale feeds");
        }
    }
}

/// One refresh cycle: lists feeds older than `cache_time` and force-fetches
/// each, bounded to `max_concurrent` in flight at a time.
async fn refresh_once(
    pool: &SqlitePool,
    registry: &Arc<Registry>,
    clock: Arc<dyn Clock>,
    opts: &RefresherOptions,
) -> Result<(), store::StoreError> {
    let threshold = clock.now() - opts.cache_time;
    let names = store::feeds_older_than(pool, threshold).await?;

    tracing::info!(count = names.len(), "starting refresh cycle");
    if names.is_empty() {
        return Ok(());
    }

    let semaphore = Arc::new(Semaphore::new(opts.max_concurrent.max(1)));
    let mut set = JoinSet::new();

    for name in names {
        let pool = pool.clone();
        let registry = registry.clone();
        let clock = clock.clone();
        let semaphore = semaphore.clone();
        let cached_opts = CachedOpenOptions {
            cache_time: opts.cache_time,
            fresh_budget: opts.per_feed_timeout,
            deadline: Some(opts.per_feed_timeout),
        };

        let per_feed_timeout = opts.per_feed_timeout;
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let mut search = Search::inactive();
            search.force_fresh = true;

            let result = tokio::time::timeout(
                per_feed_timeout,
                cached_feed::open_cached_with(&pool, &registry, clock, &name, &search, &cached_opts),
            )
            .await;

            match result {
                Ok(Ok(mut opened)) => {
                    while let Ok(Some(_)) = opened.feed.next().await {}
                    if let Err(err) = opened.feed.close().await {
                        tracing::warn!(feed = %name, error = %err, "refresh close failed");
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!(feed = %name, error = %err, "refresh fetch failed");
                }
                Err(_) => {
                    tracing::warn!(feed = %name, "refresh fetch exceeded per-feed timeout");
                }
            }
        });
    }

    while set.join_next().await.is_some() {}

    Ok(())
}
