//! Producer side of the queue: stamp, screen and append inbound events.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::clock::Clock;
use crate::core::event::{ConversationKey, EntryId, QueuedEvent, SenderRole};
use crate::error::{Error, Result};
use crate::guard::{CooldownGuard, Screening};
use crate::store::EventStore;

/// An inbound message as producers hand it over.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InboundEvent {
    pub user_id: String,
    pub channel_id: String,
    pub sender_role: SenderRole,
    #[serde(default)]
    pub content: String,
    /// Channel-side send time, unix seconds
    #[serde(default)]
    pub sent_at: Option<f64>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl InboundEvent {
    pub fn new(user_id: &str, channel_id: &str, sender_role: SenderRole, content: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            sender_role,
            content: content.to_string(),
            sent_at: None,
            payload: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Queued(EntryId),
    /// Echo of our own reply; dropped before storage.
    Echo,
}

/// Entry point for webhook receivers and the CLI.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn EventStore>,
    guard: Arc<CooldownGuard>,
    clock: Arc<dyn Clock>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn EventStore>, guard: Arc<CooldownGuard>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            guard,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn submit(&self, inbound: InboundEvent) -> Result<Admission> {
        if inbound.user_id.trim().is_empty() || inbound.channel_id.trim().is_empty() {
            return Err(Error::InvalidEvent(
                "user_id and channel_id are required".to_string(),
            ));
        }
        if let Some(sent_at) = inbound.sent_at {
            if !sent_at.is_finite() {
                return Err(Error::InvalidEvent(format!("sent_at {} is not finite", sent_at)));
            }
        }

        let event = QueuedEvent {
            conversation_key: ConversationKey::new(&inbound.user_id, &inbound.channel_id),
            arrival_time: self.clock.now(),
            sender_role: inbound.sender_role,
            content: inbound.content,
            sent_at: inbound.sent_at,
            payload: inbound.payload,
        };

        if self.guard.screen(&event) == Screening::Echo {
            return Ok(Admission::Echo);
        }

        let id = self.store.append(&event)?;
        tracing::debug!(
            "Queued {} event {} for {}",
            event.sender_role,
            id,
            event.conversation_key
        );
        Ok(Admission::Queued(id))
    }
}
