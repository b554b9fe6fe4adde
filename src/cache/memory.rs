//! Bounded in-process tier.
//!
//! Eviction is FIFO by first insertion, not LRU: reads never reorder, and
//! overwriting an existing key keeps its original slot.

use std::collections::{HashMap, VecDeque};

use super::CacheEntry;

/// Insertion-ordered map with a hard capacity.
#[derive(Debug)]
pub struct MemoryTier {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
    capacity: usize,
}

impl MemoryTier {
    /// Create a tier holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Insert or overwrite. Returns the key evicted to make room, if any.
    pub fn insert(&mut self, entry: CacheEntry) -> Option<String> {
        if let Some(existing) = self.entries.get_mut(&entry.key) {
            *existing = entry;
            return None;
        }

        let mut evicted = None;
        if self.entries.len() >= self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.entries.remove(&oldest);
            evicted = Some(oldest);
        }

        self.order.push_back(entry.key.clone());
        self.entries.insert(entry.key.clone(), entry);
        evicted
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key)?;
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        Some(removed)
    }

    /// Drop every entry written at or before `cutoff`. Returns removed keys.
    pub fn remove_older_than(&mut self, cutoff: i64) -> Vec<String> {
        let stale: Vec<String> = self
            .order
            .iter()
            .filter(|k| self.entries.get(*k).is_some_and(|e| e.timestamp <= cutoff))
            .cloned()
            .collect();
        for key in &stale {
            self.remove(key);
        }
        stale
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Keys in eviction order, oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}
