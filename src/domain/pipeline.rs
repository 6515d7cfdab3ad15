//! The request pipeline: parse request -> resolve settings/filters ->
//! fan-out concurrent cached opens -> merge -> filter -> paginate -> emit.

use crate::domain::cached_feed::{self, CachedOpenOptions};
use crate::domain::feed::{Feed, FeedError};
use crate::domain::merger::Merger;
use crate::domain::models::{Post, Settings};
use crate::domain::registry::Registry;
use crate::infrastructure::clock::Clock;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinSet;

/// A post annotated with whether it satisfied the active search. Present
/// so the caller can grey out non-matching posts instead of dropping them;
/// `Search.skip` chooses between the two behaviors.
#[derive(Debug, Clone)]
pub struct MatchedPost {
    pub post: Post,
    pub matched: bool,
}

/// One feed's open failed; carried for the partial-success banner. The
/// pipeline builds the merger from successful opens only and renders a
/// banner for the failed ones.
#[derive(Debug)]
pub struct FeedFailure {
    pub feed: String,
    pub error: FeedError,
}

/// The [`crate::domain::feed::Notes`] string a successfully opened feed
/// reported, carried alongside the merged posts so the caller can feed it
/// to [`crate::stats::Stats::record_notes`] without re-deriving which mode
/// served each feed.
#[derive(Debug)]
pub struct FeedNotes {
    pub feed: String,
    pub notes: String,
}

pub struct Page {
    pub posts: Vec<MatchedPost>,
    pub failures: Vec<FeedFailure>,
    pub notes: Vec<FeedNotes>,
    pub next_before_id: Option<String>,
}

/// Runs one request: opens every selected feed concurrently (barrier),
/// merges the successful ones, and streams the merge through each post's
/// effective search until `limit` matching posts are produced or the merge
/// is exhausted.
pub async fn run(
    pool: &SqlitePool,
    registry: &Registry,
    clock: Arc<dyn Clock>,
    settings: &Settings,
    opts: &CachedOpenOptions,
    limit: usize,
) -> Page {
    let mut set = JoinSet::new();
    for (idx, name) in settings.selected_feeds.iter().cloned().enumerate() {
        let pool = pool.clone();
        let registry_handle = registry.clone();
        let clock = clock.clone();
        let search = settings.search_for(&name).clone();
        let opts = *opts;
        set.spawn(async move {
            let result =
                cached_feed::open_cached_with(&pool, &registry_handle, clock, &name, &search, &opts)
                    .await;
            (idx, name, result)
        });
    }

    let mut opened: Vec<Option<Box<dyn Feed>>> = Vec::new();
    opened.resize_with(settings.selected_feeds.len(), || None);
    let mut failures = Vec::new();
    let mut notes = Vec::new();

    while let Some(joined) = set.join_next().await {
        let (idx, name, result) = joined.expect("cached-open task panicked");
        match result {
            Ok(o) => {
                notes.push(FeedNotes {
                    feed: name,
                    notes: o.notes,
                });
                opened[idx] = Some(o.feed);
            }
            Err(error) => failures.push(FeedFailure { feed: name, error }),
        }
    }

    let feeds: Vec<Box<dyn Feed>> = opened.into_iter().flatten().collect();
    let mut merger = Merger::new(feeds);

    let mut posts = Vec::new();
    loop {
        if posts.len() >= limit {
            break;
        }
        match merger.next().await {
            Ok(Some(post)) => {
                let search = settings.search_for(&post.author);
                let matched = search.matches(&post);
                if matched || !search.skip {
                    posts.push(MatchedPost { post, matched });
                }
            }
            Ok(None) => break,
            Err(error) => {
                failures.push(FeedFailure {
                    feed: merger.name().to_string(),
                    error,
                });
                break;
            }
        }
    }

    let _ = merger.close().await;
    for error in merger.errors() {
        failures.push(FeedFailure {
            feed: merger.name().to_string(),
            error: clone_feed_error(error),
        });
    }

    let next_before_id = posts.last().map(|m| m.post.id.clone());

    Page {
        posts,
        failures,
        notes,
        next_before_id,
    }
}

/// [`FeedError`] doesn't derive `Clone` (its `Store` variant wraps a
/// non-`Clone` `sqlx`-backed error); the banner only needs the message.
fn clone_feed_error(err: &FeedError) -> FeedError {
    FeedError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{FeedInfo, Search, Source};
    use crate::domain::registry::{Adapter, AdapterKind};
    use crate::infrastructure::clock::FixedClock;
    use crate::infrastructure::store;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    fn post(id: &str, author: &str, date: chrono::DateTime<Utc>) -> Post {
        Post {
            source: Source::Tumblr,
            id: id.to_string(),
            author: author.to_string(),
            avatar_url: String::new(),
            url: String::new(),
            title: String::new(),
            description_html: String::new(),
            tags: Vec::new(),
            date_string: String::new(),
            date,
        }
    }

    struct FailingAdapter;

    #[async_trait]
    impl Adapter for FailingAdapter {
        async fn open(&self, _name: &str, _search: &Search) -> Result<Box<dyn Feed>, FeedError> {
            Err(FeedError::FetchError(500))
        }
    }

    #[tokio::test]
    async fn partial_success_merges_the_feeds_that_opened() {
        let pool = store::connect_in_memory().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        store::persist_feed(
            &pool,
            &FeedInfo {
                name: "alice@tumblr".to_string(),
                url: String::new(),
                cached_at: now,
                description: String::new(),
                error: String::new(),
            },
            &[post("1", "alice@tumblr", now)],
        )
        .await
        .unwrap();

        let registry = Registry::new().with_adapter(AdapterKind::Rss, Arc::new(FailingAdapter));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(now));

        let mut settings = Settings::default();
        settings.selected_feeds = vec!["alice@tumblr".to_string(), "bob@example.com".to_string()];

        let page = run(
            &pool,
            &registry,
            clock,
            &settings,
            &CachedOpenOptions::default(),
            20,
        )
        .await;

        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.posts[0].post.id, "1");
        assert_eq!(page.failures.len(), 1);
        assert_eq!(page.failures[0].feed, "bob@example.com");
    }

    #[tokio::test]
    async fn non_matching_posts_are_greyed_not_dropped_when_skip_is_unset() {
        let pool = store::connect_in_memory().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        store::persist_feed(
            &pool,
            &FeedInfo {
                name: "carol@tumblr".to_string(),
                url: String::new(),
                cached_at: now,
                description: String::new(),
                error: String::new(),
            },
            &[post("1", "carol@tumblr", now)],
        )
        .await
        .unwrap();

        let registry = Registry::new();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(now));

        let mut settings = Settings::default();
        settings.selected_feeds = vec!["carol@tumblr".to_string()];
        settings.global_search.is_active = true;
        settings.global_search.terms = vec!["nomatch".to_string()];

        let page = run(
            &pool,
            &registry,
            clock,
            &settings,
            &CachedOpenOptions::default(),
            20,
        )
        .await;

        assert_eq!(page.posts.len(), 1);
        assert!(!page.posts[0].matched);
    }

    #[tokio::test]
    async fn opened_feed_notes_are_carried_on_the_page() {
        let pool = store::connect_in_memory().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        store::persist_feed(
            &pool,
            &FeedInfo {
                name: "frank@tumblr".to_string(),
                url: String::new(),
                cached_at: now,
                description: String::new(),
                error: String::new(),
            },
            &[post("1", "frank@tumblr", now)],
        )
        .await
        .unwrap();

        let registry = Registry::new();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(now));

        let mut settings = Settings::default();
        settings.selected_feeds = vec!["frank@tumblr".to_string()];

        let page = run(
            &pool,
            &registry,
            clock,
            &settings,
            &CachedOpenOptions::default(),
            20,
        )
        .await;

        assert_eq!(page.notes.len(), 1);
        assert_eq!(page.notes[0].feed, "frank@tumblr");
        assert!(page.notes[0].notes.contains("cached"));
    }

    #[tokio::test]
    async fn skip_mode_drops_non_matching_posts() {
        let pool = store::connect_in_memory().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        store::persist_feed(
            &pool,
            &FeedInfo {
                name: "dave@tumblr".to_string(),
                url: String::new(),
                cached_at: now,
                description: String::new(),
                error: String::new(),
            },
            &[post("1", "dave@tumblr", now)],
        )
        .await
        .unwrap();

        let registry = Registry::new();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(now));

        let mut settings = Settings::default();
        settings.selected_feeds = vec!["dave@tumblr".to_string()];
        settings.global_search.is_active = true;
        settings.global_search.skip = true;
        settings.global_search.terms = vec!["nomatch".to_string()];

        let page = run(
            &pool,
            &registry,
            clock,
            &settings,
            &CachedOpenOptions::default(),
            20,
        )
        .await;

        assert!(page.posts.is_empty());
    }
}
