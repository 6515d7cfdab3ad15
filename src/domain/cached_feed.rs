//! The cached-feed wrapper: the state machine deciding whether to serve
//! cached rows, a fresh upstream fetch, or a stale fallback, layered
//! transparently in front of every adapter.

use crate::domain::feed::{Feed, FeedError, NextResult, StaticFeed};
use crate::domain::models::{FeedInfo, Post, Search};
use crate::domain::registry::Registry;
use crate::infrastructure::clock::Clock;
use crate::infrastructure::store::{self, QueryOptions};
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Page size used for every cache read performed by the wrapper, matching
/// the teacher's pagination conventions.
pub const DEFAULT_LIMIT: i64 = 20;

const OUT_OF_DATE_TAG: &str = "numblr:out-of-date";

/// Tunables threaded through from [`crate::config::Config`].
#[derive(Debug, Clone, Copy)]
pub struct CachedOpenOptions {
    pub cache_time: ChronoDuration,
    pub fresh_budget: Duration,
    /// An ancestor-supplied deadline for the open call. When present, the
    /// wrapper's own 150ms budget is never applied on top of it: a
    /// *derived* deadline must never shorten the ancestor deadline.
    pub deadline: Option<Duration>,
}

impl Default for CachedOpenOptions {
    fn default() -> Self {
        Self {
            cache_time: ChronoDuration::minutes(10),
            fresh_budget: Duration::from_millis(150),
            deadline: None,
        }
    }
}

/// What `open_cached` produced: the feed to stream, and the operator-visible
/// [`crate::domain::feed::Notes`] string describing which of the five modes
/// served it.
pub struct OpenedFeed {
    pub feed: Box<dyn Feed>,
    pub notes: String,
}

/// Decides which of the five modes to serve `name` in. `registry` is the
/// "uncached-open-fn" collaborator.
pub async fn open_cached(
    pool: &SqlitePool,
    registry: &Registry,
    clock: Arc<dyn Clock>,
    name: &str,
    search: &Search,
) -> Result<OpenedFeed, FeedError> {
    open_cached_with(pool, registry, clock, name, search, &CachedOpenOptions::default()).await
}

pub async fn open_cached_with(
    pool: &SqlitePool,
    registry: &Registry,
    clock: Arc<dyn Clock>,
    name: &str,
    search: &Search,
    opts: &CachedOpenOptions,
) -> Result<OpenedFeed, FeedError> {
    let now = clock.now();
    let info = store::get_feed_info(pool, name).await?;

    // Mode 1: SERVE_CACHED.
    if let Some(info) = &info {
        let fresh_enough = now - info.cached_at < opts.cache_time;
        if !search.force_fresh && (fresh_enough || info.has_error()) {
            return serve_cached(pool, name, search, info, "cached").await;
        }
    }

    // Mode 2: RANDOM.
    if name == "random" {
        let posts = store::random_sample(pool, DEFAULT_LIMIT).await?;
        return Ok(OpenedFeed {
            feed: Box::new(StaticFeed::new(name, "", "", posts, "")),
            notes: "random".to_string(),
        });
    }

    // Mode 3: FETCH_FRESH, with a derived 150ms budget when a cached copy
    // already exists, the caller gave no deadline, and the search is not
    // forcing freshness.
    let should_budget = !search.force_fresh && opts.deadline.is_none() && info.is_some();
    let open_future = registry.open(name, search);

    let fresh_result = if should_budget {
        match tokio::time::timeout(opts.fresh_budget, open_future).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Timeout),
        }
    } else {
        open_future.await
    };

    match fresh_result {
        Ok(feed) => Ok(OpenedFeed {
            feed: Box::new(CachingFeed::new(feed, name.to_string(), pool.clone(), clock)),
            notes: String::new(),
        }),
        Err(err) if err.is_timeout() => {
            // Mode 4: SERVE_STALE_ON_TIMEOUT.
            match &info {
                Some(info) => serve_stale_on_timeout(pool, name, search, info).await,
                None => Err(err),
            }
        }
        Err(err) => {
            // Mode 5: SERVE_STALE_ON_404 / PERSIST_ERROR.
            let description = info.as_ref().map(|i| i.description.clone()).unwrap_or_default();
            let url = info.as_ref().map(|i| i.url.clone()).unwrap_or_default();
            store::persist_error(pool, name, &url, now, &description, &err.to_string()).await?;

            if err.is_not_found() {
                if let Some(info) = &info {
                    return serve_cached(pool, name, search, info, "not-found").await;
                }
            }
            Err(err)
        }
    }
}

async fn serve_cached(
    pool: &SqlitePool,
    name: &str,
    search: &Search,
    info: &FeedInfo,
    base_note: &str,
) -> Result<OpenedFeed, FeedError> {
    let opts = QueryOptions::from_search(search, DEFAULT_LIMIT);
    let posts = store::query_posts(pool, name, &opts).await?;
    let notes = notes_for(search, info, base_note);
    Ok(OpenedFeed {
        feed: Box::new(StaticFeed::new(
            name,
            info.description.clone(),
            info.url.clone(),
            posts,
            notes.clone(),
        )),
        notes,
    })
}

async fn serve_stale_on_timeout(
    pool: &SqlitePool,
    name: &str,
    search: &Search,
    info: &FeedInfo,
) -> Result<OpenedFeed, FeedError> {
    let opts = QueryOptions::from_search(search, DEFAULT_LIMIT);
    let mut posts = store::query_posts(pool, name, &opts).await?;
    for post in &mut posts {
        if !post.has_tag(OUT_OF_DATE_TAG) {
            post.tags.push(OUT_OF_DATE_TAG.to_string());
        }
    }
    let notes = notes_for(search, info, "timeout");
    Ok(OpenedFeed {
        feed: Box::new(StaticFeed::new(
            name,
            info.description.clone(),
            info.url.clone(),
            posts,
            notes.clone(),
        )),
        notes,
    })
}

fn notes_for(search: &Search, info: &FeedInfo, base: &str) -> String {
    let mut parts = vec![base.to_string()];
    if search.no_reblogs {
        parts.push("noreblogs".to_string());
    }
    if !search.terms.is_empty() || !search.exclude_terms.is_empty() {
        parts.push("search".to_string());
    }
    if !search.tags.is_empty() || !search.exclude_tags.is_empty() {
        parts.push("tags".to_string());
    }
    if info.has_error() && base == "cached" {
        parts.push(format!("cached-by-error: {}", info.error));
    }
    parts.join(",")
}

/// Wraps a freshly opened upstream feed: forwards `next()`, buffers every
/// post seen, and on `close()` atomically upserts the buffer plus a
/// refreshed `feed_infos` row. Writing is deferred to `close()` rather
/// than interleaved with `next()`, per the single atomic upsert
/// requirement.
pub struct CachingFeed {
    inner: Box<dyn Feed>,
    name: String,
    buffered: Vec<Post>,
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    closed: bool,
}

impl CachingFeed {
    fn new(inner: Box<dyn Feed>, name: String, pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            name,
            buffered: Vec::new(),
            pool,
            clock,
            closed: false,
        }
    }
}

#[async_trait]
impl Feed for CachingFeed {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn url(&self) -> &str {
        self.inner.url()
    }

    async fn next(&mut self) -> NextResult {
        match self.inner.next().await? {
            Some(post) => {
                self.buffered.push(post.clone());
                Ok(Some(post))
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), FeedError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.inner.close().await?;

        // Zero posts observed: close cleanly without writing, so a
        // transient empty response never overwrites usable cached state.
        if self.buffered.is_empty() {
            return Ok(());
        }

        let info = FeedInfo {
            name: self.name.clone(),
            url: self.inner.url().to_string(),
            cached_at: self.clock.now(),
            description: self.inner.description().to_string(),
            error: String::new(),
        };

        store::persist_feed(&self.pool, &info, &self.buffered).await?;
        Ok(())
    }
}
