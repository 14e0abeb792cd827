//! Cancellable deadlines owned by a session engine
//!
//! Round timeouts, lock windows, and delayed destruction are all expressed as
//! deadlines in a [`TimerQueue`]. Finishing a session calls
//! [`TimerQueue::cancel_all`], so nothing fires after teardown.

use crate::clock::Millis;

#[derive(Debug, Clone)]
struct Entry<K> {
    at: Millis,
    seq: u64,
    key: K,
}

/// Ordered set of pending deadlines keyed by `K`
#[derive(Debug, Clone)]
pub struct TimerQueue<K> {
    entries: Vec<Entry<K>>,
    next_seq: u64,
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<K: Clone + PartialEq> TimerQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `key` to fire at `at`. Deadlines with equal times fire in
    /// scheduling order.
    pub fn schedule(&mut self, at: Millis, key: K) {
        let entry = Entry {
            at,
            seq: self.next_seq,
            key,
        };
        self.next_seq += 1;
        let idx = self
            .entries
            .partition_point(|e| (e.at, e.seq) <= (entry.at, entry.seq));
        self.entries.insert(idx, entry);
    }

    /// Cancel every pending deadline for `key`; returns how many were removed
    pub fn cancel(&mut self, key: &K) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| &e.key != key);
        before - self.entries.len()
    }

    /// Cancel everything
    pub fn cancel_all(&mut self) {
        self.entries.clear();
    }

    /// Remove and return the earliest deadline at or before `now`
    pub fn pop_due(&mut self, now: Millis) -> Option<(Millis, K)> {
        match self.entries.first() {
            Some(first) if first.at <= now => {
                let entry = self.entries.remove(0);
                Some((entry.at, entry.key))
            }
            _ => None,
        }
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Millis> {
        self.entries.first().map(|e| e.at)
    }

    /// Deadline of the first pending entry for `key`
    pub fn deadline_of(&self, key: &K) -> Option<Millis> {
        self.entries.iter().find(|e| &e.key == key).map(|e| e.at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
