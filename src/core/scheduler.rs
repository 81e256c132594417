//! Debounce scheduling: decides which conversations are quiet long enough
//! to dispatch.
//!
//! Each cycle the full store snapshot is grouped by conversation key, in
//! the order keys were first seen. A group is eligible only when every
//! member is at least `window` seconds old; a conversation that is still
//! receiving messages is never split.

use std::collections::HashMap;

use crate::core::event::{ConversationGroup, ConversationKey, EntryId};
use crate::store::RawEntry;

#[derive(Debug, Clone, Copy)]
pub struct DebounceScheduler {
    window: f64,
}

/// A group with at least one undecodable entry.
#[derive(Debug, Clone)]
pub struct PoisonedGroup {
    pub key: ConversationKey,
    pub error: String,
    pub quiescent: bool,
}

/// Result of grouping one snapshot.
#[derive(Debug, Default)]
pub struct ScanPlan {
    /// Quiet, fully decodable groups in first-seen order.
    pub eligible: Vec<ConversationGroup>,
    /// Keys with at least one member younger than the window.
    pub pending: Vec<ConversationKey>,
    pub poisoned: Vec<PoisonedGroup>,
    entries_by_key: HashMap<ConversationKey, Vec<RawEntry>>,
    scanned: usize,
}

impl ScanPlan {
    /// Every entry of `key` in this snapshot, decodable or not.
    pub fn entries_for(&self, key: &ConversationKey) -> &[RawEntry] {
        self.entries_by_key
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn entry_ids_for(&self, key: &ConversationKey) -> Vec<EntryId> {
        self.entries_for(key).iter().map(|e| e.id.clone()).collect()
    }

    pub fn scanned(&self) -> usize {
        self.scanned
    }
}

impl DebounceScheduler {
    pub fn new(window_secs: f64) -> Self {
        Self {
            window: window_secs,
        }
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    pub fn is_quiescent(&self, last_arrival: f64, now: f64) -> bool {
        now - last_arrival >= self.window
    }

    /// Group a snapshot and split it into eligible, pending and poisoned.
    pub fn plan(&self, entries: Vec<RawEntry>, now: f64) -> ScanPlan {
        let scanned = entries.len();
        let mut order: Vec<ConversationKey> = Vec::new();
        let mut entries_by_key: HashMap<ConversationKey, Vec<RawEntry>> = HashMap::new();

        for entry in entries {
            let slot = entries_by_key.entry(entry.key.clone()).or_insert_with(|| {
                order.push(entry.key.clone());
                Vec::new()
            });
            slot.push(entry);
        }

        let mut plan = ScanPlan {
            scanned,
            ..Default::default()
        };

        for key in order {
            let Some(raw) = entries_by_key.get_mut(&key) else {
                continue;
            };
            // Arrival order within the group, ties keep store order.
            raw.sort_by(|a, b| a.arrival_time.total_cmp(&b.arrival_time));

            let last_arrival = raw
                .iter()
                .map(|e| e.arrival_time)
                .fold(f64::NEG_INFINITY, f64::max);
            let quiescent = self.is_quiescent(last_arrival, now);

            match raw.iter().map(RawEntry::decode).collect::<crate::Result<Vec<_>>>() {
                Err(e) => {
                    tracing::warn!("Conversation {} has a malformed entry: {}", key, e);
                    plan.poisoned.push(PoisonedGroup {
                        key,
                        error: e.to_string(),
                        quiescent,
                    });
                }
                Ok(events) if quiescent => {
                    plan.eligible.push(ConversationGroup { key, events });
                }
                Ok(_) => plan.pending.push(key),
            }
        }

        plan.entries_by_key = entries_by_key;
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{QueuedEvent, SenderRole};

    fn raw(user: &str, text: &str, t: f64) -> RawEntry {
        let event = QueuedEvent::new(ConversationKey::new(user, "store"), SenderRole::User, text, t);
        RawEntry::encode(EntryId::generate(), &event).unwrap()
    }

    fn contents(group: &ConversationGroup) -> Vec<String> {
        group.events.iter().map(|e| e.event.content.clone()).collect()
    }

    #[test]
    fn test_group_waits_for_quiet_window() {
        let scheduler = DebounceScheduler::new(60.0);
        let entries = vec![raw("k", "A", 0.0), raw("k", "B", 1.0), raw("k", "C", 2.0)];

        let plan = scheduler.plan(entries.clone(), 3.0);
        assert!(plan.eligible.is_empty());
        assert_eq!(plan.pending, vec![ConversationKey::new("k", "store")]);

        let plan = scheduler.plan(entries, 65.0);
        assert_eq!(plan.eligible.len(), 1);
        assert_eq!(contents(&plan.eligible[0]), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_one_young_member_holds_the_whole_group() {
        let scheduler = DebounceScheduler::new(60.0);
        let entries = vec![raw("k", "old", 0.0), raw("k", "new", 50.0)];

        let plan = scheduler.plan(entries, 100.0);
        assert!(plan.eligible.is_empty());
        assert_eq!(plan.pending.len(), 1);
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let scheduler = DebounceScheduler::new(60.0);
        let plan = scheduler.plan(vec![raw("k", "A", 40.0)], 100.0);
        assert_eq!(plan.eligible.len(), 1);
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let scheduler = DebounceScheduler::new(10.0);
        let entries = vec![
            raw("b", "b1", 1.0),
            raw("a", "a1", 2.0),
            raw("b", "b2", 3.0),
            raw("c", "c1", 4.0),
        ];

        let plan = scheduler.plan(entries, 100.0);
        let keys: Vec<String> = plan.eligible.iter().map(|g| g.key.user_id.clone()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(contents(&plan.eligible[0]), vec!["b1", "b2"]);
        assert_eq!(plan.scanned(), 4);
    }

    #[test]
    fn test_malformed_entry_only_poisons_its_group() {
        let scheduler = DebounceScheduler::new(10.0);
        let mut bad = raw("bad", "x", 1.0);
        bad.body = "invalid json".to_string();
        let entries = vec![bad, raw("bad", "y", 2.0), raw("good", "ok", 3.0)];

        let plan = scheduler.plan(entries, 100.0);
        assert_eq!(plan.eligible.len(), 1);
        assert_eq!(plan.eligible[0].key.user_id, "good");
        assert_eq!(plan.poisoned.len(), 1);
        assert!(plan.poisoned[0].quiescent);
        assert_eq!(plan.entry_ids_for(&plan.poisoned[0].key).len(), 2);
    }
}
