//! The Feed abstraction: a lazy, finite, non-increasing-by-date sequence
//! of posts.

use crate::domain::models::Post;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    /// A 4xx/5xx response from the upstream source. Carries the status
    /// code so the cached-feed wrapper can branch on 404.
    #[error("upstream returned status {0}")]
    FetchError(u16),

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("feed parse error: {0}")]
    Parse(String),

    #[error("store error: {0}")]
    Store(#[from] crate::infrastructure::store::StoreError),
}

impl FeedError {
    /// A 404 specifically, as opposed to any other fetch error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FeedError::FetchError(404))
    }

    /// Timeout classification: a typed [`FeedError::Timeout`], or a
    /// transport error whose message matches one of the documented fragile
    /// string patterns. New patterns may be added here without touching
    /// call sites.
    pub fn is_timeout(&self) -> bool {
        match self {
            FeedError::Timeout => true,
            FeedError::Transport(msg) => {
                msg.ends_with("i/o timeout")
                    || msg.contains("Temporary failure in name resolution")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return FeedError::Timeout;
        }
        if let Some(status) = err.status() {
            return FeedError::FetchError(status.as_u16());
        }
        FeedError::Transport(err.to_string())
    }
}

/// End-of-feed sentinel for [`Feed::next`].
pub type NextResult = Result<Option<Post>, FeedError>;

/// A lazy sequence of posts from one logical source.
///
/// `next()` MUST return posts in non-increasing `date` order; `close()`
/// MUST be safe to call after `next()` has returned `Ok(None)` or an
/// `Err`.
#[async_trait]
pub trait Feed: Send {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn url(&self) -> &str;

    async fn next(&mut self) -> NextResult;
    async fn close(&mut self) -> Result<(), FeedError>;
}

/// Optional operator-visible provenance capability: `"cached"`,
/// `"timeout"`, `"not-found"`, `"noreblogs"`, etc. Implemented by feeds
/// that have an interesting story to tell about how they were produced;
/// plain upstream adapters need not implement it.
pub trait Notes {
    fn notes(&self) -> &str;
}

/// A feed with a fixed, pre-buffered set of posts. Used as the serving
/// feed for every cache-backed mode in the cached-feed wrapper, and as a
/// minimal adapter stand-in for sources whose scraping is out of scope for
/// this engine.
pub struct StaticFeed {
    name: String,
    description: String,
    url: String,
    posts: std::vec::IntoIter<Post>,
    notes: String,
}

impl StaticFeed {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
        posts: Vec<Post>,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            url: url.into(),
            posts: posts.into_iter(),
            notes: notes.into(),
        }
    }
}

#[async_trait]
impl Feed for StaticFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn next(&mut self) -> NextResult {
        Ok(self.posts.next())
    }

    async fn close(&mut self) -> Result<(), FeedError> {
        Ok(())
    }
}

impl Notes for StaticFeed {
    fn notes(&self) -> &str {
        &self.notes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Source;
    use chrono::Utc;

    fn post(id: &str) -> Post {
        Post {
            source: Source::Tumblr,
            id: id.to_string(),
            author: "alice@tumblr".to_string(),
            avatar_url: String::new(),
            url: String::new(),
            title: String::new(),
            description_html: String::new(),
            tags: Vec::new(),
            date_string: String::new(),
            date: Utc::now(),
        }
    }

    #[tokio::test]
    async fn static_feed_yields_posts_then_ends() {
        let mut feed = StaticFeed::new("alice@tumblr", "", "", vec![post("1"), post("2")], "cached");
        assert_eq!(feed.next().await.unwrap().unwrap().id, "1");
        assert_eq!(feed.next().await.unwrap().unwrap().id, "2");
        assert!(feed.next().await.unwrap().is_none());
        feed.close().await.unwrap();
    }

    #[test]
    fn timeout_classification_matches_documented_patterns() {
        assert!(FeedError::Timeout.is_timeout());
        assert!(FeedError::Transport("dial tcp: i/o timeout".to_string()).is_timeout());
        assert!(FeedError::Transport(
            "lookup foo: Temporary failure in name resolution".to_string()
        )
        .is_timeout());
        assert!(!FeedError::Transport("connection refused".to_string()).is_timeout());
    }

    #[test]
    fn fetch_error_404_is_not_found() {
        assert!(FeedError::FetchError(404).is_not_found());
        assert!(!FeedError::FetchError(500).is_not_found());
    }
}
