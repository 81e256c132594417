//! Per-conversation human takeover and echo tracking.
//!
//! State is two timestamps per conversation. Whether automation is paused
//! is recomputed from them on every check, so resuming needs no explicit
//! transition.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::config::GuardSettings;
use crate::core::event::{ConversationKey, QueuedEvent, SenderRole};

/// The last reply the automated pipeline sent into a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomatedReply {
    pub content: String,
    pub time: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CooldownState {
    pub last_human_operator_time: Option<f64>,
    pub last_automated_reply: Option<AutomatedReply>,
}

/// Outcome of screening an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screening {
    Accept,
    /// The channel re-delivered our own reply as a human message.
    Echo,
}

#[derive(Debug)]
pub struct CooldownGuard {
    cooldown: f64,
    echo_tolerance: f64,
    states: Mutex<HashMap<ConversationKey, CooldownState>>,
}

impl CooldownGuard {
    pub fn new(cooldown_secs: f64, echo_tolerance_secs: f64) -> Self {
        Self {
            cooldown: cooldown_secs,
            echo_tolerance: echo_tolerance_secs,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &GuardSettings) -> Self {
        Self::new(settings.cooldown_secs, settings.echo_tolerance_secs)
    }

    fn states(&self) -> MutexGuard<'_, HashMap<ConversationKey, CooldownState>> {
        // The map holds plain timestamps; a panic mid-update cannot leave it torn.
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Classify an inbound event. Only human-operator events matching the
    /// last automated reply (trimmed text, within the echo tolerance) are
    /// echoes. Screening never changes state.
    pub fn screen(&self, event: &QueuedEvent) -> Screening {
        if event.sender_role != SenderRole::HumanOperator {
            return Screening::Accept;
        }

        let states = self.states();
        let Some(reply) = states
            .get(&event.conversation_key)
            .and_then(|s| s.last_automated_reply.as_ref())
        else {
            return Screening::Accept;
        };

        let ts = event.timestamp();
        if (ts - reply.time).abs() <= self.echo_tolerance
            && reply.content.trim() == event.content.trim()
        {
            tracing::info!(
                "Dropping echo of automated reply in {} ({:.1}s apart)",
                event.conversation_key,
                (ts - reply.time).abs()
            );
            return Screening::Echo;
        }
        Screening::Accept
    }

    /// Remember an accepted human-operator message. The stored time only
    /// moves forward.
    pub fn note_human_activity(&self, key: &ConversationKey, time: f64) {
        let mut states = self.states();
        let state = states.entry(key.clone()).or_default();
        state.last_human_operator_time = Some(match state.last_human_operator_time {
            Some(prev) => prev.max(time),
            None => time,
        });
    }

    pub fn record_automated_reply(&self, key: &ConversationKey, content: &str, time: f64) {
        let mut states = self.states();
        states.entry(key.clone()).or_default().last_automated_reply = Some(AutomatedReply {
            content: content.to_string(),
            time,
        });
    }

    /// True while a human operator spoke within the cooldown window before
    /// `reference_time`. The reference never moves behind the last human
    /// message, so out-of-order timestamps keep the pause in place.
    pub fn cooldown_active(&self, key: &ConversationKey, reference_time: f64) -> bool {
        let states = self.states();
        let Some(last_human) = states.get(key).and_then(|s| s.last_human_operator_time) else {
            return false;
        };
        let reference = reference_time.max(last_human);
        reference - last_human <= self.cooldown
    }

    pub fn state(&self, key: &ConversationKey) -> CooldownState {
        self.states().get(key).cloned().unwrap_or_default()
    }

    /// Forget conversations with no human or automated activity within
    /// `max(cooldown, echo_tolerance)` of `now`. Returns how many were dropped.
    pub fn prune_idle(&self, now: f64) -> usize {
        let horizon = self.cooldown.max(self.echo_tolerance);
        let mut states = self.states();
        let before = states.len();
        states.retain(|_, state| {
            let last_human = state.last_human_operator_time.unwrap_or(f64::NEG_INFINITY);
            let last_reply = state
                .last_automated_reply
                .as_ref()
                .map_or(f64::NEG_INFINITY, |r| r.time);
            now - last_human.max(last_reply) <= horizon
        });
        before - states.len()
    }

    pub fn tracked(&self) -> usize {
        self.states().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConversationKey {
        ConversationKey::new("5582999990001", "5582333330000")
    }

    fn human(text: &str, t: f64) -> QueuedEvent {
        QueuedEvent::new(key(), SenderRole::HumanOperator, text, t)
    }

    #[test]
    fn test_echo_of_recent_reply_is_dropped() {
        let guard = CooldownGuard::new(300.0, 20.0);
        guard.record_automated_reply(&key(), "Olá", 100.0);

        assert_eq!(guard.screen(&human(" Olá ", 103.0)), Screening::Echo);
        assert_eq!(guard.state(&key()).last_human_operator_time, None);
    }

    #[test]
    fn test_echo_window_and_text_must_both_match() {
        let guard = CooldownGuard::new(300.0, 20.0);
        guard.record_automated_reply(&key(), "Olá", 100.0);

        assert_eq!(guard.screen(&human("Olá", 121.0)), Screening::Accept);
        assert_eq!(guard.screen(&human("Olá, tudo bem?", 101.0)), Screening::Accept);
        assert_eq!(guard.screen(&human("Olá", 79.0)), Screening::Accept);
    }

    #[test]
    fn test_user_events_pass_untouched() {
        let guard = CooldownGuard::new(300.0, 20.0);
        guard.record_automated_reply(&key(), "Olá", 100.0);

        let user = QueuedEvent::new(key(), SenderRole::User, "Olá", 101.0);
        assert_eq!(guard.screen(&user), Screening::Accept);
        assert!(!guard.cooldown_active(&key(), 101.0));
    }

    #[test]
    fn test_cooldown_after_human_message() {
        let guard = CooldownGuard::new(300.0, 20.0);
        guard.note_human_activity(&key(), 200.0);

        assert!(guard.cooldown_active(&key(), 450.0));
        assert!(guard.cooldown_active(&key(), 500.0));
        assert!(!guard.cooldown_active(&key(), 560.0));
    }

    #[test]
    fn test_reference_time_never_moves_backward() {
        let guard = CooldownGuard::new(300.0, 20.0);
        guard.note_human_activity(&key(), 1000.0);

        // An event stamped before the human message is still paused.
        assert!(guard.cooldown_active(&key(), 10.0));
    }

    #[test]
    fn test_last_human_time_is_monotonic() {
        let guard = CooldownGuard::new(300.0, 20.0);
        guard.note_human_activity(&key(), 500.0);
        guard.note_human_activity(&key(), 200.0);

        assert_eq!(guard.state(&key()).last_human_operator_time, Some(500.0));
    }

    #[test]
    fn test_screening_does_not_start_cooldown() {
        let guard = CooldownGuard::new(300.0, 20.0);
        assert_eq!(guard.screen(&human("Oi, aqui é a Ana", 200.0)), Screening::Accept);

        assert_eq!(guard.state(&key()).last_human_operator_time, None);
        assert!(!guard.cooldown_active(&key(), 210.0));
    }

    #[test]
    fn test_prune_idle_keeps_recent_conversations() {
        let guard = CooldownGuard::new(300.0, 20.0);
        let other = ConversationKey::new("5582999990002", "5582333330000");
        guard.note_human_activity(&key(), 100.0);
        guard.record_automated_reply(&other, "Olá", 350.0);

        assert_eq!(guard.prune_idle(400.0), 0);
        assert_eq!(guard.prune_idle(401.0), 1);
        assert_eq!(guard.tracked(), 1);
        assert!(guard.state(&other).last_automated_reply.is_some());
        assert_eq!(guard.state(&key()), CooldownState::default());
    }
}
