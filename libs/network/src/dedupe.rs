//! Receive-Side Duplicate Filter
//!
//! Retries reuse their sequence number, so a receiver that wants
//! at-most-once execution remembers the last `window` (endpoint, seq) pairs
//! it executed and skips repeats. Old pairs fall out of the window in
//! arrival order; once the sender's counter wraps, a sequence number is
//! legitimately reused and must not still be in the window.

use std::collections::{HashSet, VecDeque};

/// Sliding window of recently executed frames
#[derive(Debug)]
pub struct DuplicateFilter {
    window: VecDeque<(u16, u16)>,
    seen: HashSet<(u16, u16)>,
    capacity: usize,
    suppressed: u64,
}

impl DuplicateFilter {
    /// Filter remembering `capacity` frames; 0 disables filtering
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
            suppressed: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Record a frame; `false` if it was already executed recently
    pub fn check(&mut self, endpoint: u16, seq: u16) -> bool {
        if self.capacity == 0 {
            return true;
        }
        let key = (endpoint, seq);
        if self.seen.contains(&key) {
            self.suppressed += 1;
            return false;
        }

        self.window.push_back(key);
        self.seen.insert(key);
        if self.window.len() > self.capacity {
            if let Some(oldest) = self.window.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    /// Whether `(endpoint, seq)` is inside the window
    pub fn is_recent(&self, endpoint: u16, seq: u16) -> bool {
        self.seen.contains(&(endpoint, seq))
    }

    /// Duplicates rejected so far
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn clear(&mut self) {
        self.window.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_within_window_is_rejected() {
        let mut filter = DuplicateFilter::new(4);
        assert!(filter.check(1, 10));
        assert!(filter.check(1, 11));
        assert!(!filter.check(1, 10));
        // Same seq from a different endpoint is a different frame.
        assert!(filter.check(2, 10));
        assert_eq!(filter.suppressed(), 1);
    }

    #[test]
    fn test_old_entries_age_out() {
        let mut filter = DuplicateFilter::new(2);
        assert!(filter.check(1, 1));
        assert!(filter.check(1, 2));
        assert!(filter.check(1, 3));
        assert!(!filter.is_recent(1, 1));
        assert!(filter.check(1, 1));
    }

    #[test]
    fn test_zero_capacity_disables() {
        let mut filter = DuplicateFilter::new(0);
        assert!(!filter.is_enabled());
        assert!(filter.check(1, 1));
        assert!(filter.check(1, 1));
    }
}
