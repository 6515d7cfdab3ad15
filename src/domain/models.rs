use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the upstream services a [`Post`] can originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Tumblr,
    Twitter,
    Instagram,
    Youtube,
    Tiktok,
    Ao3,
    Web,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Source::Tumblr => "tumblr",
            Source::Twitter => "twitter",
            Source::Instagram => "instagram",
            Source::Youtube => "youtube",
            Source::Tiktok => "tiktok",
            Source::Ao3 => "ao3",
            Source::Web => "web",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown source: {0}")]
pub struct UnknownSource(pub String);

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tumblr" => Ok(Source::Tumblr),
            "twitter" => Ok(Source::Twitter),
            "instagram" => Ok(Source::Instagram),
            "youtube" => Ok(Source::Youtube),
            "tiktok" => Ok(Source::Tiktok),
            "ao3" => Ok(Source::Ao3),
            "web" => Ok(Source::Web),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

/// A single post aggregated from an upstream source.
///
/// Invariants: `id` and `source` are never empty; `date` is comparable
/// across all feeds; `author` is the canonical feed name and is set by the
/// adapter or the merger, never by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub source: Source,
    pub id: String,
    pub author: String,
    pub avatar_url: String,
    pub url: String,
    pub title: String,
    pub description_html: String,
    pub tags: Vec<String>,
    pub date_string: String,
    pub date: DateTime<Utc>,
}

impl Post {
    /// Validates the construction invariants.
    pub fn validate(&self) -> Result<(), PostError> {
        if self.id.is_empty() {
            return Err(PostError::EmptyId);
        }
        Ok(())
    }

    /// Returns true if this post matches the word `tag`, case-insensitively.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("post id must not be empty")]
    EmptyId,
}

/// Cache metadata for one feed, keyed by `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedInfo {
    pub name: String,
    pub url: String,
    pub cached_at: DateTime<Utc>,
    pub description: String,
    pub error: String,
}

impl FeedInfo {
    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// An immutable filter expression, produced once by [`crate::domain::search::parse`]
/// and applied both at cache-query time (coarse) and per-post (fine).
#[derive(Debug, Clone, Default)]
pub struct Search {
    pub is_active: bool,
    pub before_id: Option<String>,
    pub before_date: Option<DateTime<Utc>>,
    pub force_fresh: bool,
    pub no_reblogs: bool,
    pub skip: bool,
    pub terms: Vec<String>,
    pub exclude_terms: Vec<String>,
    pub tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    pub terms_re: Option<regex::Regex>,
    pub exclude_terms_re: Option<regex::Regex>,
}

impl Search {
    /// An inactive search that matches everything and never forces a
    /// fresh fetch.
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// Per-request selection of feeds and filters.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub selected_feeds: Vec<String>,
    pub searches: std::collections::HashMap<String, Search>,
    pub global_search: Search,
}

impl Settings {
    /// The effective search for `feed`: the per-feed search if one was
    /// given, otherwise the global search.
    pub fn search_for(&self, feed: &str) -> &Search {
        self.searches.get(feed).unwrap_or(&self.global_search)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str) -> Post {
        Post {
            source: Source::Tumblr,
            id: id.to_string(),
            author: "alice@tumblr".to_string(),
            avatar_url: String::new(),
            url: String::new(),
            title: String::new(),
            description_html: String::new(),
            tags: vec!["Fun".to_string(), "Stuff".to_string()],
            date_string: String::new(),
            date: Utc::now(),
        }
    }

    #[test]
    fn post_with_empty_id_fails_validation() {
        let mut p = post("1");
        p.id = String::new();
        assert!(matches!(p.validate(), Err(PostError::EmptyId)));
    }

    #[test]
    fn post_with_id_validates() {
        assert!(post("1").validate().is_ok());
    }

    #[test]
    fn has_tag_is_case_insensitive() {
        let p = post("1");
        assert!(p.has_tag("fun"));
        assert!(p.has_tag("STUFF"));
        assert!(!p.has_tag("nope"));
    }

    #[test]
    fn source_round_trips_through_string() {
        for s in [
            Source::Tumblr,
            Source::Twitter,
            Source::Instagram,
            Source::Youtube,
            Source::Tiktok,
            Source::Ao3,
            Source::Web,
        ] {
            let parsed: Source = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn settings_falls_back_to_global_search() {
        let mut settings = Settings::default();
        settings.global_search.no_reblogs = true;
        assert!(settings.search_for("alice@tumblr").no_reblogs);
    }
}
