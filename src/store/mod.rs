//! Event store - durable, append-only buffer of pending conversation events.
//!
//! Producers append concurrently; the consumer loop is the only reader and
//! remover. Entries are removed by id, never by range, so events appended
//! after a scan survive a removal based on that scan.

pub mod audit;
pub mod memory;
pub mod sqlite;

use serde::{Deserialize, Serialize};

use crate::core::event::{ConversationKey, EntryId, QueuedEvent, SenderRole, StoredEvent};
use crate::error::{Error, Result};

pub use audit::{EvictionAudit, SqliteEvictionAudit};
pub use memory::MemoryEventStore;
pub use sqlite::SqliteEventStore;

/// Storage contract for the queue.
pub trait EventStore: Send + Sync {
    /// Add an event. Atomic and safe under concurrent callers.
    fn append(&self, event: &QueuedEvent) -> Result<EntryId>;

    /// Snapshot of every entry, ordered by arrival time.
    fn scan_all(&self) -> Result<Vec<RawEntry>>;

    /// Delete exactly these entries. Already-absent ids are ignored.
    /// Returns how many entries were actually deleted.
    fn remove(&self, ids: &[EntryId]) -> Result<usize>;

    /// Entry and conversation counts.
    fn stats(&self) -> Result<QueueStats> {
        let entries = self.scan_all()?;
        let mut keys: Vec<&ConversationKey> = entries.iter().map(|e| &e.key).collect();
        keys.sort();
        keys.dedup();
        Ok(QueueStats {
            entries: entries.len(),
            conversations: keys.len(),
            oldest_arrival: entries.first().map(|e| e.arrival_time),
        })
    }
}

/// Stored form of an event: the key and arrival time are kept outside the
/// encoded body so an undecodable body can still be attributed to its group.
#[derive(Clone, Debug, PartialEq)]
pub struct RawEntry {
    pub id: EntryId,
    pub key: ConversationKey,
    pub arrival_time: f64,
    pub body: String,
}

/// Encoded part of a stored event.
#[derive(Serialize, Deserialize)]
struct EventBody {
    sender_role: SenderRole,
    #[serde(default)]
    content: String,
    #[serde(default)]
    sent_at: Option<f64>,
    #[serde(default)]
    payload: serde_json::Value,
}

impl RawEntry {
    pub fn encode(id: EntryId, event: &QueuedEvent) -> Result<Self> {
        let body = EventBody {
            sender_role: event.sender_role,
            content: event.content.clone(),
            sent_at: event.sent_at,
            payload: event.payload.clone(),
        };
        Ok(Self {
            id,
            key: event.conversation_key.clone(),
            arrival_time: event.arrival_time,
            body: serde_json::to_string(&body)?,
        })
    }

    pub fn decode(&self) -> Result<StoredEvent> {
        let body: EventBody = serde_json::from_str(&self.body).map_err(|e| {
            Error::Store(format!("entry {} for {} is malformed: {}", self.id, self.key, e))
        })?;
        Ok(StoredEvent {
            id: self.id.clone(),
            event: QueuedEvent {
                conversation_key: self.key.clone(),
                arrival_time: self.arrival_time,
                sender_role: body.sender_role,
                content: body.content,
                sent_at: body.sent_at,
                payload: body.payload,
            },
        })
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub entries: usize,
    pub conversations: usize,
    pub oldest_arrival: Option<f64>,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Queue Stats:")?;
        writeln!(f, "  Entries:       {}", self.entries)?;
        writeln!(f, "  Conversations: {}", self.conversations)?;
        match self.oldest_arrival {
            Some(t) => write!(f, "  Oldest:        {:.3}", t),
            None => write!(f, "  Oldest:        -"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_keeps_key_when_body_is_malformed() {
        let entry = RawEntry {
            id: EntryId("01ABC".to_string()),
            key: ConversationKey::new("u", "c"),
            arrival_time: 3.0,
            body: "invalid json".to_string(),
        };
        let err = entry.decode().unwrap_err();
        assert!(err.to_string().contains("u_c"));
    }

    #[test]
    fn test_encoded_body_decodes_to_same_event() {
        let mut event = QueuedEvent::new(
            ConversationKey::new("u", "c"),
            SenderRole::HumanOperator,
            "Olá",
            12.5,
        );
        event.payload = serde_json::json!({"messageType": "conversation"});
        let entry = RawEntry::encode(EntryId::generate(), &event).unwrap();
        assert_eq!(entry.decode().unwrap().event, event);
    }
}
