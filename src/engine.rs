//! The `Engine`: an explicit value owning the store, the HTTP transport,
//! the refresher task handle, and the stats collector, replacing
//! process-wide singletons with a value threaded through request handlers
//! as a parameter.

use crate::config::Config;
use crate::domain::adapters::RssAdapter;
use crate::domain::cached_feed::CachedOpenOptions;
use crate::domain::models::Settings;
use crate::domain::pipeline::{self, Page};
use crate::domain::registry::{AdapterKind, Registry};
use crate::infrastructure::clock::{Clock, SystemClock};
use crate::infrastructure::refresher::{self, RefresherOptions};
use crate::infrastructure::store;
use crate::stats::Stats;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct Engine {
    pool: SqlitePool,
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    stats: Arc<Stats>,
    config: Config,
    refresher_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Engine {
    /// Builds an `Engine` against `config`, with the generic RSS/Tumblr
    /// adapter wired in. Additional adapters (nitter, bibliogram, tiktok,
    /// ao3, youtube) are external collaborators; register them with
    /// [`Engine::with_adapter`] before calling [`Engine::spawn_refresher`].
    pub async fn new(config: Config) -> Result<Self, sqlx::Error> {
        let pool = store::connect(&config.database_url()).await?;

        let client = reqwest::Client::builder()
            .user_agent(crate::user_agent())
            .gzip(true)
            .brotli(true)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("reqwest client configuration is valid");

        let registry = Registry::new().with_adapter(AdapterKind::Rss, Arc::new(RssAdapter::new(client.clone())));
        let registry = registry.with_adapter(AdapterKind::Tumblr, Arc::new(RssAdapter::new(client)));

        Ok(Self {
            pool,
            registry: Arc::new(registry),
            clock: Arc::new(SystemClock),
            stats: Arc::new(Stats::new()),
            config,
            refresher_handle: None,
        })
    }

    pub fn with_adapter(mut self, kind: AdapterKind, adapter: Arc<dyn crate::domain::registry::Adapter>) -> Self {
        self.registry = Arc::new((*self.registry).clone().with_adapter(kind, adapter));
        self
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Spawns the background refresher as its own task. The returned
    /// handle is stashed on the `Engine`; dropping or aborting it stops the
    /// sweep.
    pub fn spawn_refresher(&mut self) {
        let pool = self.pool.clone();
        let registry = self.registry.clone();
        let clock = self.clock.clone();
        let opts = RefresherOptions {
            interval: self.config.refresh_interval,
            cache_time: self.config.cache_time,
            per_feed_timeout: self.config.refresh_timeout,
            max_concurrent: self.config.max_concurrent_refresh,
        };
        self.refresher_handle = Some(tokio::spawn(refresher::run(pool, registry, clock, opts)));
    }

    /// Runs one request through the pipeline, falling back to
    /// `default_feeds` when `settings` selected none.
    pub async fn handle_request(&self, mut settings: Settings, limit: usize) -> Page {
        if settings.selected_feeds.is_empty() {
            settings.selected_feeds = self.config.default_feeds.clone();
        }

        let opts = CachedOpenOptions {
            cache_time: self.config.cache_time,
            fresh_budget: self.config.fresh_budget,
            deadline: None,
        };

        let page = pipeline::run(&self.pool, &self.registry, self.clock.clone(), &settings, &opts, limit).await;

        for note in &page.notes {
            self.stats.record_notes(&note.notes);
        }
        for failure in &page.failures {
            tracing::warn!(feed = %failure.feed, error = %failure.error, "feed failed to open");
            self.stats.record_error();
        }

        page
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(handle) = self.refresher_handle.take() {
            handle.abort();
        }
    }
}
