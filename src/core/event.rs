//! Inbound conversation events and the groups the scheduler builds from them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one user's conversation with one channel instance.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    /// Opaque user identifier (e.g. the customer's phone number)
    pub user_id: String,

    /// Opaque channel-instance identifier (e.g. the store's number)
    pub channel_id: String,
}

impl ConversationKey {
    pub fn new(user_id: &str, channel_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.user_id, self.channel_id)
    }
}

/// Who produced an event.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    #[serde(alias = "usr")]
    User,
    #[serde(alias = "llm")]
    Automated,
    #[serde(alias = "hum")]
    HumanOperator,
}

impl fmt::Display for SenderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderRole::User => write!(f, "user"),
            SenderRole::Automated => write!(f, "automated"),
            SenderRole::HumanOperator => write!(f, "human_operator"),
        }
    }
}

impl std::str::FromStr for SenderRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" | "usr" => Ok(SenderRole::User),
            "automated" | "llm" => Ok(SenderRole::Automated),
            "human_operator" | "human" | "hum" => Ok(SenderRole::HumanOperator),
            _ => Err(format!("Unknown sender role: {}", s)),
        }
    }
}

/// One buffered inbound message. Never mutated once queued.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QueuedEvent {
    pub conversation_key: ConversationKey,

    /// Ingestion timestamp in seconds, assigned by the producer's clock
    pub arrival_time: f64,

    pub sender_role: SenderRole,

    /// Message text, may be empty
    #[serde(default)]
    pub content: String,

    /// Channel-side send time in seconds; falls back to `arrival_time`
    #[serde(default)]
    pub sent_at: Option<f64>,

    /// Channel payload, passed through unmodified
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl QueuedEvent {
    pub fn new(
        conversation_key: ConversationKey,
        sender_role: SenderRole,
        content: &str,
        arrival_time: f64,
    ) -> Self {
        Self {
            conversation_key,
            arrival_time,
            sender_role,
            content: content.to_string(),
            sent_at: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Timestamp used by the cooldown and echo checks.
    pub fn timestamp(&self) -> f64 {
        self.sent_at.unwrap_or(self.arrival_time)
    }
}

/// Store-assigned identity of a queued entry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn generate() -> Self {
        EntryId(ulid::Ulid::new().to_string())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded store entry.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredEvent {
    pub id: EntryId,
    pub event: QueuedEvent,
}

/// All queued events of one conversation, in arrival order.
#[derive(Clone, Debug)]
pub struct ConversationGroup {
    pub key: ConversationKey,
    pub events: Vec<StoredEvent>,
}

impl ConversationGroup {
    /// Arrival time of the youngest member.
    pub fn last_arrival(&self) -> f64 {
        self.events
            .iter()
            .map(|e| e.event.arrival_time)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn entry_ids(&self) -> Vec<EntryId> {
        self.events.iter().map(|e| e.id.clone()).collect()
    }

    /// The batch handed to the processor.
    pub fn batch(&self) -> Vec<QueuedEvent> {
        self.events.iter().map(|e| e.event.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
