//! Per-conversation failure counting for bounded retry and eviction.

use std::collections::HashMap;

use crate::core::event::ConversationKey;

#[derive(Debug)]
pub struct RetryTracker {
    max_retries: u32,
    attempts: HashMap<ConversationKey, u32>,
}

impl RetryTracker {
    /// A key is evicted once its attempt count exceeds `max_retries`.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            attempts: HashMap::new(),
        }
    }

    /// Record a failed dispatch. Returns the new attempt count.
    pub fn on_failure(&mut self, key: &ConversationKey) -> u32 {
        let count = self.attempts.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// A success wipes earlier failures.
    pub fn on_success(&mut self, key: &ConversationKey) {
        self.attempts.remove(key);
    }

    pub fn attempts(&self, key: &ConversationKey) -> u32 {
        self.attempts.get(key).copied().unwrap_or(0)
    }

    pub fn should_evict(&self, key: &ConversationKey) -> bool {
        self.attempts(key) > self.max_retries
    }

    /// Keys over budget, in a stable order.
    pub fn due_for_eviction(&self) -> Vec<ConversationKey> {
        let mut keys: Vec<ConversationKey> = self
            .attempts
            .iter()
            .filter(|(_, count)| **count > self.max_retries)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drop all state for `key`, returning the attempt count it had.
    pub fn evict(&mut self, key: &ConversationKey) -> u32 {
        self.attempts.remove(key).unwrap_or(0)
    }

    pub fn tracked(&self) -> usize {
        self.attempts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_after_budget() {
        let mut tracker = RetryTracker::new(3);
        let key = ConversationKey::new("u", "c");

        for expected in 1..=3 {
            assert_eq!(tracker.on_failure(&key), expected);
            assert!(!tracker.should_evict(&key));
        }
        assert_eq!(tracker.on_failure(&key), 4);
        assert!(tracker.should_evict(&key));
        assert_eq!(tracker.due_for_eviction(), vec![key.clone()]);

        assert_eq!(tracker.evict(&key), 4);
        assert_eq!(tracker.attempts(&key), 0);
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_success_resets_to_zero() {
        let mut tracker = RetryTracker::new(3);
        let key = ConversationKey::new("u", "c");

        tracker.on_failure(&key);
        tracker.on_failure(&key);
        tracker.on_failure(&key);
        tracker.on_success(&key);
        assert_eq!(tracker.attempts(&key), 0);

        // A single later failure is far from eviction.
        assert_eq!(tracker.on_failure(&key), 1);
        assert!(!tracker.should_evict(&key));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut tracker = RetryTracker::new(0);
        let a = ConversationKey::new("a", "c");
        let b = ConversationKey::new("b", "c");

        tracker.on_failure(&a);
        assert!(tracker.should_evict(&a));
        assert!(!tracker.should_evict(&b));
    }
}
