//! K-way merge of sorted feeds by date.

use crate::domain::feed::{Feed, FeedError, NextResult};
use crate::domain::models::Post;
use async_trait::async_trait;
use tokio::task::JoinSet;

struct Slot {
    feed: Box<dyn Feed>,
    head: Option<Post>,
    done: bool,
    last_error: Option<FeedError>,
}

/// A concurrent k-way merge over feeds whose individual `next()` calls
/// already return posts in non-increasing `date` order.
///
/// Heads are refreshed in parallel: every call to
/// [`Merger::next`] fans out a concurrent `next()` to every feed whose
/// head slot is empty and which has not permanently ended, then blocks
/// until all of them complete before picking the maximum.
pub struct Merger {
    name: String,
    slots: Vec<Slot>,
}

impl Merger {
    /// Builds a merger over `feeds`. `Name()` is the set union of
    /// constituent names preserving first occurrence.
    pub fn new(feeds: Vec<Box<dyn Feed>>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut names = Vec::new();
        for feed in &feeds {
            if seen.insert(feed.name().to_string()) {
                names.push(feed.name().to_string());
            }
        }

        Self {
            name: names.join(","),
            slots: feeds
                .into_iter()
                .map(|feed| Slot {
                    feed,
                    head: None,
                    done: false,
                    last_error: None,
                })
                .collect(),
        }
    }

    /// All feeds exhausted: every slot is done, with no pending head.
    fn exhausted(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.done && slot.head.is_none())
    }

    /// Fans out a concurrent `next()` to every slot whose head is empty
    /// and which has not permanently ended, then blocks until all of them
    /// complete. Each spawned task carries its feed by
    /// value and hands it back in the join result, since a boxed trait
    /// object can't be `next()`-ed across an await while still borrowed
    /// by `self`.
    async fn fill_heads(&mut self) -> Result<(), FeedError> {
        let mut set: JoinSet<(usize, Box<dyn Feed>, NextResult)> = JoinSet::new();

        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.head.is_none() && !slot.done {
                let mut feed = std::mem::replace(&mut slot.feed, Box::new(Empty));
                set.spawn(async move {
                    let result = feed.next().await;
                    (idx, feed, result)
                });
            }
        }

        while let Some(joined) = set.join_next().await {
            let (idx, feed, result) = joined.expect("feed next task panicked");
            let slot = &mut self.slots[idx];
            slot.feed = feed;
            match result {
                Ok(Some(post)) => slot.head = Some(post),
                Ok(None) => slot.done = true,
                Err(err) => {
                    tracing::warn!(feed = slot.feed.name(), error = %err, "feed next() failed, treating as end-of-feed");
                    slot.done = true;
                    slot.last_error = Some(err);
                }
            }
        }

        Ok(())
    }

    /// Returns the post with the maximum date across the current heads,
    /// with ties broken by lower feed index. The merger overrides
    /// `post.author` with the feed's canonical name.
    pub async fn next(&mut self) -> NextResult {
        self.fill_heads().await?;

        if self.exhausted() {
            return Ok(None);
        }

        let winner = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.head.as_ref().map(|post| (idx, post.date)))
            .max_by(|(idx_a, date_a), (idx_b, date_b)| {
                date_a.cmp(date_b).then(idx_b.cmp(idx_a))
            })
            .map(|(idx, _)| idx);

        match winner {
            Some(idx) => {
                let mut post = self.slots[idx].head.take().expect("winner has a head");
                post.author = self.slots[idx].feed.name().to_string();
                Ok(Some(post))
            }
            None => Ok(None),
        }
    }

    pub async fn close(&mut self) -> Result<(), FeedError> {
        let mut last_error = None;
        for slot in &mut self.slots {
            if let Err(err) = slot.feed.close().await {
                last_error = Some(err);
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Errors observed on constituent feeds during iteration, in slot
    /// order, for the caller to surface as a partial-success banner:
    /// merging never treats one feed's error as fatal.
    pub fn errors(&self) -> Vec<&FeedError> {
        self.slots
            .iter()
            .filter_map(|slot| slot.last_error.as_ref())
            .collect()
    }
}

#[async_trait]
impl Feed for Merger {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        ""
    }

    fn url(&self) -> &str {
        ""
    }

    async fn next(&mut self) -> NextResult {
        Merger::next(self).await
    }

    async fn close(&mut self) -> Result<(), FeedError> {
        Merger::close(self).await
    }
}

/// Placeholder swapped into a slot while its real feed is off running a
/// `next()` call; never observed by callers.
struct Empty;

#[async_trait]
impl Feed for Empty {
    fn name(&self) -> &str {
        ""
    }
    fn description(&self) -> &str {
        ""
    }
    fn url(&self) -> &str {
        ""
    }
    async fn next(&mut self) -> NextResult {
        Ok(None)
    }
    async fn close(&mut self) -> Result<(), FeedError> {
        Ok(())
    }
}
