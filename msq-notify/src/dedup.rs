//! Remembers which notification ids were delivered and toasted.

use msq_core::RecentSet;

pub const DEFAULT_DEDUP_CAPACITY: usize = 500;

#[derive(Debug, Clone)]
pub struct Deduper {
    seen: RecentSet<String>,
    toasted: RecentSet<String>,
}

impl Default for Deduper {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

impl Deduper {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: RecentSet::new(capacity),
            toasted: RecentSet::new(capacity),
        }
    }

    /// True the first time `id` is offered.
    pub fn first_sighting(&mut self, id: &str) -> bool {
        self.seen.insert(id.to_string())
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.seen.contains(&id.to_string())
    }

    /// True if no toast has been shown for `id` yet; records it.
    pub fn claim_toast(&mut self, id: &str) -> bool {
        self.toasted.insert(id.to_string())
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.toasted.clear();
    }
}
