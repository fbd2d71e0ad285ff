//! Short-term memory: the bounded recent-turn buffer.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::MemoryEntry;

/// Default number of turns kept before the oldest is evicted.
pub const DEFAULT_CAPACITY: usize = 20;

/// FIFO ring of recent turns. Never holds more than `capacity` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortTermBuffer {
    entries: VecDeque<MemoryEntry>,
    capacity: usize,
}

impl Default for ShortTermBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ShortTermBuffer {
    /// Create an empty buffer. A capacity of 0 is raised to 1.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `entry`, returning the evicted oldest entry if the buffer was full.
    pub fn push(&mut self, entry: MemoryEntry) -> Option<MemoryEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// The newest `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }

    /// All entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.iter()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::types::Role;

    fn entry(n: usize) -> MemoryEntry {
        MemoryEntry::new(Role::User, format!("msg {n}"), "unknown", &Clock::default())
    }

    #[test]
    fn evicts_oldest_first() {
        let mut buf = ShortTermBuffer::with_capacity(3);
        for i in 1..=3 {
            assert!(buf.push(entry(i)).is_none());
        }
        let evicted = buf.push(entry(4)).expect("full buffer evicts");
        assert_eq!(evicted.content, "msg 1");
        let kept: Vec<_> = buf.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(kept, vec!["msg 2", "msg 3", "msg 4"]);
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let mut buf = ShortTermBuffer::default();
        for i in 1..=10 {
            buf.push(entry(i));
        }
        let tail: Vec<_> = buf.recent(3).map(|e| e.content.clone()).collect();
        assert_eq!(tail, vec!["msg 8", "msg 9", "msg 10"]);
        assert_eq!(buf.recent(50).count(), 10);
    }

    #[test]
    fn zero_capacity_is_raised() {
        let mut buf = ShortTermBuffer::with_capacity(0);
        buf.push(entry(1));
        buf.push(entry(2));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.capacity(), 1);
    }
}
