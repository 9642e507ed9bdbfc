//! Bounded in-memory notification list, newest first.

use msq_core::{NotificationData, Timestamp};
use std::collections::VecDeque;

pub const DEFAULT_STORE_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct NotificationStore {
    capacity: usize,
    items: VecDeque<NotificationData>,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_CAPACITY)
    }
}

impl NotificationStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::new(),
        }
    }

    /// Insert in `created_at` order. Returns false for a known id.
    ///
    /// When full, the oldest notification is dropped; a notification older
    /// than everything in a full store is not stored at all.
    pub fn add(&mut self, notification: NotificationData) -> bool {
        if self.contains(&notification.id) {
            return false;
        }
        let position = self
            .items
            .iter()
            .position(|existing| existing.created_at <= notification.created_at)
            .unwrap_or(self.items.len());
        if position >= self.capacity {
            return false;
        }
        self.items.insert(position, notification);
        self.items.truncate(self.capacity);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|n| n.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&NotificationData> {
        self.items.iter().find(|n| n.id == id)
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.read => {
                n.read = true;
                true
            }
            _ => false,
        }
    }

    /// Returns how many were unread.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for n in self.items.iter_mut().filter(|n| !n.read) {
            n.read = true;
            changed += 1;
        }
        changed
    }

    pub fn remove(&mut self, id: &str) -> Option<NotificationData> {
        let index = self.items.iter().position(|n| n.id == id)?;
        self.items.remove(index)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &NotificationData> {
        self.items.iter()
    }

    /// Timestamp of the newest notification, used to ask for missed ones.
    pub fn latest_timestamp(&self) -> Option<Timestamp> {
        self.items.front().map(|n| n.created_at)
    }

    pub fn snapshot(&self) -> Vec<NotificationData> {
        self.items.iter().cloned().collect()
    }

    /// Replace the contents with `items`, keeping ordering and bounds.
    pub fn restore(&mut self, items: Vec<NotificationData>) -> usize {
        self.items.clear();
        items.into_iter().map(|n| self.add(n)).filter(|added| *added).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn at(id: &str, minutes_ago: i64) -> NotificationData {
        NotificationData::new(id, "t", "m").with_created_at(Utc::now() - Duration::minutes(minutes_ago))
    }

    #[test]
    fn test_newest_first_and_refuses_duplicates() {
        let mut store = NotificationStore::default();
        assert!(store.add(at("old", 10)));
        assert!(store.add(at("new", 1)));
        assert!(store.add(at("mid", 5)));
        assert!(!store.add(at("mid", 0)));
        let ids: Vec<&str> = store.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_bounded() {
        let mut store = NotificationStore::new(2);
        store.add(at("a", 3));
        store.add(at("b", 2));
        store.add(at("c", 1));
        assert_eq!(store.len(), 2);
        assert!(!store.contains("a"));
        assert!(!store.add(at("ancient", 100)));
    }

    #[test]
    fn test_read_state() {
        let mut store = NotificationStore::default();
        store.add(at("a", 2));
        store.add(at("b", 1));
        assert_eq!(store.unread_count(), 2);
        assert!(store.mark_read("a"));
        assert!(!store.mark_read("a"));
        assert_eq!(store.unread_count(), 1);
        assert_eq!(store.mark_all_read(), 1);
        assert_eq!(store.unread_count(), 0);
        assert!(store.remove("a").is_some());
        assert!(store.remove("a").is_none());
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut store = NotificationStore::default();
        store.add(at("a", 2));
        store.add(at("b", 1));
        store.mark_read("b");
        let snapshot = store.snapshot();

        let mut restored = NotificationStore::default();
        assert_eq!(restored.restore(snapshot), 2);
        assert!(restored.get("b").unwrap().read);
        assert_eq!(restored.latest_timestamp(), store.latest_timestamp());
    }
}
