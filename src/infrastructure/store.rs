//! The durable cache store: `feed_infos` + `posts`.

use crate::domain::models::{FeedInfo, Post, Search, Source};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database is locked, retry")]
    Locked,

    #[error("post id and source must not be empty")]
    ConstraintViolation,

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if let Some(code) = db_err.code() {
            // SQLITE_BUSY / SQLITE_LOCKED
            if code == "5" || code == "6" {
                return StoreError::Locked;
            }
        }
    }
    StoreError::Sqlx(err)
}

/// Opens the SQLite pool and runs migrations, matching the teacher's WAL
/// journal mode and busy timeout: reads must not block writers for longer
/// than a small busy timeout before returning a retryable error.
pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_millis(50));

    // An in-memory database exists only for the lifetime of one connection;
    // an empty `cache-path` means a single *shared* in-memory store, so a
    // multi-connection pool would silently scatter feeds across unrelated
    // empty databases. Pin the pool to one connection in that case,
    // matching `connect_in_memory`'s test helper.
    let max_connections = if url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Opens an in-memory pool for tests; one connection, since `:memory:`
/// databases are per-connection.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

fn row_to_post(row: &sqlx::sqlite::SqliteRow) -> Result<Post, StoreError> {
    let source: String = row.try_get("source").map_err(classify)?;
    let tags_json: String = row.try_get("tags").map_err(classify)?;
    Ok(Post {
        source: Source::from_str(&source).map_err(|_| StoreError::ConstraintViolation)?,
        id: row.try_get("id").map_err(classify)?,
        author: row.try_get("author").map_err(classify)?,
        avatar_url: row.try_get("avatar_url").map_err(classify)?,
        url: row.try_get("url").map_err(classify)?,
        title: row.try_get("title").map_err(classify)?,
        description_html: row.try_get("description_html").map_err(classify)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        date_string: row.try_get("date_string").map_err(classify)?,
        date: row.try_get("date").map_err(classify)?,
    })
}

/// Selectable predicates for a cache read, composed by the cached-feed
/// wrapper from the active [`Search`].
///
/// The cursor is carried as both `before_id` and `before_date`: pagination
/// seeks on `(date, id)` rather than joining back into `posts` to recover
/// the cursor row's date.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub before_id: Option<String>,
    pub before_date: Option<DateTime<Utc>>,
    pub no_reblogs: bool,
    pub term: Option<String>,
    pub tag: Option<String>,
    pub limit: i64,
}

impl QueryOptions {
    pub fn from_search(search: &Search, limit: i64) -> Self {
        Self {
            before_id: search.before_id.clone(),
            before_date: search.before_date,
            no_reblogs: search.no_reblogs,
            term: search.terms.first().cloned(),
            tag: search.tags.first().cloned(),
            limit,
        }
    }
}

/// Posts for `feed`, `date DESC`, filtered by the given options. This is
/// the single query builder backing `latest`, `before`, `no_reblogs`,
/// `term`, and `tag`: each of those is this function called with one
/// option set.
pub async fn query_posts(
    pool: &SqlitePool,
    feed: &str,
    opts: &QueryOptions,
) -> Result<Vec<Post>, StoreError> {
    let mut sql = String::from("SELECT * FROM posts WHERE name = ?");

    let compound_cursor = opts.before_id.is_some() && opts.before_date.is_some();
    if compound_cursor {
        sql.push_str(" AND (date < ? OR (date = ? AND id < ?))");
    } else if opts.before_id.is_some() {
        sql.push_str(" AND id < ?");
    }
    if opts.no_reblogs {
        sql.push_str(" AND description_html NOT LIKE '%class=\"tumblr_blog\"%'");
    }
    if opts.term.is_some() {
        sql.push_str(
            " AND (LOWER(title) LIKE ? OR LOWER(description_html) LIKE ? OR LOWER(tags) LIKE ?)",
        );
    }
    if opts.tag.is_some() {
        sql.push_str(" AND LOWER(tags) LIKE ?");
    }
    sql.push_str(" ORDER BY date DESC LIMIT ?");

    let mut query = sqlx::query(&sql).bind(feed);
    if compound_cursor {
        let before_date = opts.before_date.expect("compound_cursor implies before_date");
        query = query
            .bind(before_date)
            .bind(before_date)
            .bind(opts.before_id.as_ref().expect("compound_cursor implies before_id"));
    } else if let Some(before_id) = &opts.before_id {
        query = query.bind(before_id);
    }
    if let Some(term) = &opts.term {
        let pattern = format!("%{}%", term.to_lowercase());
        query = query.bind(pattern.clone()).bind(pattern.clone()).bind(pattern);
    }
    if let Some(tag) = &opts.tag {
        query = query.bind(format!("%{}%", tag.to_lowercase()));
    }
    let rows = query
        .bind(opts.limit)
        .fetch_all(pool)
        .await
        .map_err(classify)?;

    rows.iter().map(row_to_post).collect()
}

/// The `limit` most recent posts for `feed`.
pub async fn latest(pool: &SqlitePool, feed: &str, limit: i64) -> Result<Vec<Post>, StoreError> {
    query_posts(
        pool,
        feed,
        &QueryOptions {
            limit,
            ..Default::default()
        },
    )
    .await
}

/// Returns only posts strictly before the `(cursor_date, cursor_id)` pair,
/// preserving pagination monotonicity.
///
/// `cursor_date` is optional for callers that only have an id on hand
/// (e.g. a bare id typed into a URL); when given, pagination seeks on
/// `(date, id)` directly instead of joining back into `posts` to look the
/// cursor row's date up first.
pub async fn before(
    pool: &SqlitePool,
    feed: &str,
    cursor_id: &str,
    cursor_date: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<Post>, StoreError> {
    query_posts(
        pool,
        feed,
        &QueryOptions {
            before_id: Some(cursor_id.to_string()),
            before_date: cursor_date,
            limit,
            ..Default::default()
        },
    )
    .await
}

/// `count` random authors, then the single latest post for each.
pub async fn random_sample(pool: &SqlitePool, count: i64) -> Result<Vec<Post>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT p.* FROM posts p
        INNER JOIN (
            SELECT author FROM posts GROUP BY author ORDER BY RANDOM() LIMIT ?
        ) sampled ON sampled.author = p.author
        GROUP BY p.author
        HAVING p.date = MAX(p.date)
        "#,
    )
    .bind(count)
    .fetch_all(pool)
    .await
    .map_err(classify)?;

    rows.iter().map(row_to_post).collect()
}

/// Names whose `cached_at < instant`, randomized order.
pub async fn feeds_older_than(
    pool: &SqlitePool,
    instant: DateTime<Utc>,
) -> Result<Vec<String>, StoreError> {
    let rows = sqlx::query("SELECT name FROM feed_infos WHERE cached_at < ? ORDER BY RANDOM()")
        .bind(instant)
        .fetch_all(pool)
        .await
        .map_err(classify)?;

    Ok(rows
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect())
}

pub async fn get_feed_info(pool: &SqlitePool, name: &str) -> Result<Option<FeedInfo>, StoreError> {
    let row = sqlx::query("SELECT * FROM feed_infos WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(classify)?;

    Ok(match row {
        Some(row) => Some(FeedInfo {
            name: row.try_get("name").map_err(classify)?,
            url: row.try_get("url").map_err(classify)?,
            cached_at: row.try_get("cached_at").map_err(classify)?,
            description: row.try_get("description").map_err(classify)?,
            error: row.try_get("error").map_err(classify)?,
        }),
        None => None,
    })
}

/// Persists a fetch error against `feed_infos` so the next request within
/// `CacheTime` serves `cached-by-error`. Idempotent upsert by primary key.
pub async fn persist_error(
    pool: &SqlitePool,
    name: &str,
    url: &str,
    now: DateTime<Utc>,
    description: &str,
    error: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO feed_infos (name, url, cached_at, description, error)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            url = excluded.url,
            cached_at = excluded.cached_at,
            description = excluded.description,
            error = excluded.error
        "#,
    )
    .bind(name)
    .bind(url)
    .bind(now)
    .bind(description)
    .bind(error)
    .execute(pool)
    .await
    .map_err(classify)?;

    Ok(())
}

/// Atomically upserts the posts buffered by one upstream iteration plus
/// the refreshed `feed_infos` row: a single atomic upsert per wrapper
/// `close()`. Empty `posts` does not write anything beyond touching
/// `feed_infos`, except the caller MUST skip calling this entirely when
/// zero posts were observed.
pub async fn persist_feed(
    pool: &SqlitePool,
    info: &FeedInfo,
    posts: &[Post],
) -> Result<(), StoreError> {
    for post in posts {
        post.validate()
            .map_err(|_| StoreError::ConstraintViolation)?;
    }

    let mut tx = pool.begin().await.map_err(classify)?;

    sqlx::query(
        r#"
        INSERT INTO feed_infos (name, url, cached_at, description, error)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            url = excluded.url,
            cached_at = excluded.cached_at,
            description = excluded.description,
            error = excluded.error
        "#,
    )
    .bind(&info.name)
    .bind(&info.url)
    .bind(info.cached_at)
    .bind(&info.description)
    .bind(&info.error)
    .execute(&mut *tx)
    .await
    .map_err(classify)?;

    for post in posts {
        let tags_json = serde_json::to_string(&post.tags).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            r#"
            INSERT INTO posts (
                source, name, id, author, avatar_url, url, title,
                description_html, tags, date_string, date
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, name, id) DO UPDATE SET
                author = excluded.author,
                avatar_url = excluded.avatar_url,
                url = excluded.url,
                title = excluded.title,
                description_html = excluded.description_html,
                tags = excluded.tags,
                date_string = excluded.date_string,
                date = excluded.date
            "#,
        )
        .bind(post.source.to_string())
        .bind(&info.name)
        .bind(&post.id)
        .bind(&post.author)
        .bind(&post.avatar_url)
        .bind(&post.url)
        .bind(&post.title)
        .bind(&post.description_html)
        .bind(tags_json)
        .bind(&post.date_string)
        .bind(post.date)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;
    }

    tx.commit().await.map_err(classify)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Source;
    use chrono::{Duration, TimeZone};

    fn post(id: &str, date: DateTime<Utc>) -> Post {
        Post {
            source: Source::Tumblr,
            id: id.to_string(),
            author: "alice@tumblr".to_string(),
            avatar_url: String::new(),
            url: String::new(),
            title: "Hello".to_string(),
            description_html: "<p>world</p>".to_string(),
            tags: vec!["fun".to_string()],
            date_string: date.to_rfc3339(),
            date,
        }
    }

    fn info(name: &str, cached_at: DateTime<Utc>) -> FeedInfo {
        FeedInfo {
            name: name.to_string(),
            url: format!("https://example.com/{name}"),
            cached_at,
            description: String::new(),
            error: String::new(),
        }
    }

    #[tokio::test]
    async fn round_trip_preserves_post_fields() {
        let pool = connect_in_memory().await.unwrap();
        let date = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let p = post("3", date);

        persist_feed(&pool, &info("alice@tumblr", Utc::now()), &[p.clone()])
            .await
            .unwrap();

        let got = latest(&pool, "alice@tumblr", 10).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, p.id);
        assert_eq!(got[0].tags, p.tags);
        assert_eq!(got[0].date, p.date);
    }

    #[tokio::test]
    async fn before_returns_only_strictly_older_ids_ordered_by_date() {
        let pool = connect_in_memory().await.unwrap();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let posts: Vec<_> = (1..=5)
            .map(|i| post(&i.to_string(), base + Duration::days(i)))
            .collect();
        persist_feed(&pool, &info("dave@tumblr", Utc::now()), &posts)
            .await
            .unwrap();

        let page = before(&pool, "dave@tumblr", "4", None, 10).await.unwrap();
        assert!(page.iter().all(|p| p.id.as_str() < "4"));
        let dates = page.iter().map(|p| p.date).collect::<Vec<_>>();
        let mut sorted = dates.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(dates, sorted);
    }

    #[tokio::test]
    async fn before_with_a_cursor_date_seeks_on_the_compound_key() {
        let pool = connect_in_memory().await.unwrap();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        // Two posts sharing the same date as the cursor, to exercise the
        // `date = ? AND id < ?` tie-break branch.
        let posts = vec![
            post("1", base),
            post("2", base),
            post("3", base + Duration::days(1)),
        ];
        persist_feed(&pool, &info("dave@tumblr", Utc::now()), &posts)
            .await
            .unwrap();

        let page = before(&pool, "dave@tumblr", "2", Some(base), 10)
            .await
            .unwrap();
        assert_eq!(page.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["1"]);
    }

    #[tokio::test]
    async fn no_reblogs_option_excludes_tumblr_blog_marker() {
        let pool = connect_in_memory().await.unwrap();
        let now = Utc::now();
        let mut reblog = post("1", now);
        reblog.description_html = "<div class=\"tumblr_blog\">x</div>".to_string();
        let original = post("2", now - Duration::seconds(1));
        persist_feed(
            &pool,
            &info("alice@tumblr", now),
            &[reblog, original.clone()],
        )
        .await
        .unwrap();

        let got = query_posts(
            &pool,
            "alice@tumblr",
            &QueryOptions {
                no_reblogs: true,
                limit: 10,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, original.id);
    }

    #[tokio::test]
    async fn persist_error_then_read_back_feed_info() {
        let pool = connect_in_memory().await.unwrap();
        let now = Utc::now();
        persist_error(&pool, "bob@tumblr", "https://bob", now, "", "boom")
            .await
            .unwrap();

        let info = get_feed_info(&pool, "bob@tumblr").await.unwrap().unwrap();
        assert_eq!(info.error, "boom");
        assert!(info.has_error());
    }

    #[tokio::test]
    async fn empty_post_id_is_rejected_as_constraint_violation() {
        let pool = connect_in_memory().await.unwrap();
        let mut bad = post("1", Utc::now());
        bad.id = String::new();

        let err = persist_feed(&pool, &info("alice@tumblr", Utc::now()), &[bad])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation));
    }

    #[tokio::test]
    async fn connect_with_empty_cache_path_yields_one_shared_memory_connection() {
        let pool = connect("sqlite::memory:").await.unwrap();
        assert_eq!(pool.size(), 1, "an in-memory pool must be pinned to a single connection");

        persist_feed(&pool, &info("alice@tumblr", Utc::now()), &[post("1", Utc::now())])
            .await
            .unwrap();

        // Acquiring repeatedly must hit the same connection, not scatter
        // writes across separate empty in-memory databases.
        let got = latest(&pool, "alice@tumblr", 10).await.unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn feeds_older_than_threshold_lists_stale_names() {
        let pool = connect_in_memory().await.unwrap();
        let now = Utc::now();
        persist_feed(&pool, &info("old@tumblr", now - Duration::hours(2)), &[])
            .await
            .unwrap();
        persist_feed(&pool, &info("fresh@tumblr", now), &[]).await.unwrap();

        let stale = feeds_older_than(&pool, now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(stale, vec!["old@tumblr".to_string()]);
    }
}
