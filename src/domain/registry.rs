//! Adapter registry: maps a feed identifier to the upstream adapter
//! responsible for it.

use crate::domain::feed::{Feed, FeedError};
use crate::domain::models::Search;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// The upstream service an adapter speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Twitter,
    Instagram,
    Youtube,
    Tumblr,
    Tiktok,
    Ao3,
    Rss,
}

/// Picks the adapter kind for `name`, evaluated in a fixed suffix/URL-shape
/// order. The registry itself never fails here; only adapter
/// *construction* (the actual `open` call) can fail.
pub fn dispatch_kind(name: &str) -> AdapterKind {
    if ends_with_any(name, &["@twitter", "@t"]) {
        return AdapterKind::Twitter;
    }
    if ends_with_any(name, &["@instagram", "@ig"]) {
        return AdapterKind::Instagram;
    }
    if ends_with_any(name, &["@youtube", "@yt"]) {
        return AdapterKind::Youtube;
    }
    if name.ends_with("@tumblr") {
        return AdapterKind::Tumblr;
    }
    if name.contains("tiktok.com") || name.ends_with("@tiktok") {
        return AdapterKind::Tiktok;
    }
    if name.contains("archiveofourown.org") || name.ends_with("@ao3") {
        return AdapterKind::Ao3;
    }
    if name.contains('@') || name.contains('.') {
        return AdapterKind::Rss;
    }
    AdapterKind::Tumblr
}

fn ends_with_any(name: &str, suffixes: &[&str]) -> bool {
    suffixes.iter().any(|suffix| name.ends_with(suffix))
}

/// Upstream adapter contract: construct a [`Feed`] for a resolved name.
/// Adapters MUST set `post.source` and `post.id`;
/// `post.author` SHOULD be canonical. A 4xx upstream status MUST surface
/// as [`FeedError::FetchError`].
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn open(&self, name: &str, search: &Search) -> Result<Box<dyn Feed>, FeedError>;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no adapter registered for {kind:?} (feed {name})")]
    NoAdapter { kind: AdapterKind, name: String },
}

/// Maps [`AdapterKind`] to a concrete [`Adapter`] implementation. Each
/// source-specific scraper (nitter, bibliogram, tiktok, ao3, youtube) is
/// an external collaborator; this crate ships only the dispatch rules and
/// the generic RSS/Tumblr adapter, and lets the host process register the
/// rest.
#[derive(Clone, Default)]
pub struct Registry {
    adapters: HashMap<AdapterKind, Arc<dyn Adapter>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, kind: AdapterKind, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }

    pub async fn open(&self, name: &str, search: &Search) -> Result<Box<dyn Feed>, FeedError> {
        let kind = dispatch_kind(name);
        match self.adapters.get(&kind) {
            Some(adapter) => adapter.open(name, search).await,
            None => Err(FeedError::Transport(
                RegistryError::NoAdapter {
                    kind,
                    name: name.to_string(),
                }
                .to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_rules_follow_documented_priority() {
        assert_eq!(dispatch_kind("alice@twitter"), AdapterKind::Twitter);
        assert_eq!(dispatch_kind("alice@t"), AdapterKind::Twitter);
        assert_eq!(dispatch_kind("alice@instagram"), AdapterKind::Instagram);
        assert_eq!(dispatch_kind("alice@ig"), AdapterKind::Instagram);
        assert_eq!(dispatch_kind("alice@youtube"), AdapterKind::Youtube);
        assert_eq!(dispatch_kind("alice@yt"), AdapterKind::Youtube);
        assert_eq!(dispatch_kind("alice@tumblr"), AdapterKind::Tumblr);
        assert_eq!(
            dispatch_kind("https://www.tiktok.com/@alice"),
            AdapterKind::Tiktok
        );
        assert_eq!(dispatch_kind("alice@tiktok"), AdapterKind::Tiktok);
        assert_eq!(
            dispatch_kind("https://archiveofourown.org/users/alice"),
            AdapterKind::Ao3
        );
        assert_eq!(dispatch_kind("alice@ao3"), AdapterKind::Ao3);
        assert_eq!(dispatch_kind("feeds.example.com/rss"), AdapterKind::Rss);
        assert_eq!(dispatch_kind("alice@example.net"), AdapterKind::Rss);
        assert_eq!(dispatch_kind("alice"), AdapterKind::Tumblr);
    }

    #[test]
    fn bare_word_without_at_or_dot_falls_back_to_tumblr() {
        assert_eq!(dispatch_kind("plainname"), AdapterKind::Tumblr);
    }

    #[tokio::test]
    async fn missing_adapter_surfaces_as_feed_error() {
        let registry = Registry::new();
        let err = registry
            .open("alice@twitter", &Search::inactive())
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Transport(_)));
    }
}
