//! Process-wide counters: an explicit value owned by
//! [`crate::engine::Engine`] instead of process-wide singletons, updated
//! under a short-held mutex.

use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy)]
pub struct Snapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub timeouts: u64,
    pub errors: u64,
}

#[derive(Default)]
pub struct Stats {
    inner: Mutex<Snapshot>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.inner.lock().expect("stats mutex poisoned").cache_hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.inner.lock().expect("stats mutex poisoned").cache_misses += 1;
    }

    pub fn record_timeout(&self) {
        self.inner.lock().expect("stats mutex poisoned").timeouts += 1;
    }

    pub fn record_error(&self) {
        self.inner.lock().expect("stats mutex poisoned").errors += 1;
    }

    /// Records one `open_cached` outcome by inspecting its Notes string, so
    /// callers don't need to re-derive which mode served the request.
    pub fn record_notes(&self, notes: &str) {
        if notes.is_empty() {
            self.record_cache_miss();
        } else if notes.contains("timeout") {
            self.record_timeout();
        } else if notes.contains("not-found") || notes.contains("cached-by-error") {
            self.record_error();
        } else if notes.contains("cached") {
            self.record_cache_hit();
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.inner.lock().expect("stats mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_notes_classifies_each_mode() {
        let stats = Stats::new();
        stats.record_notes("cached");
        stats.record_notes("timeout,search");
        stats.record_notes("not-found");
        stats.record_notes("");

        let snap = stats.snapshot();
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.cache_misses, 1);
    }
}
