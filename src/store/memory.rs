//! In-process event store, for tests and ephemeral runs.

use std::sync::Mutex;

use crate::core::event::{EntryId, QueuedEvent};
use crate::error::{Error, Result};

use super::{EventStore, RawEntry};

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    entries: Mutex<Vec<RawEntry>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pre-built entry, bypassing encoding. Lets tests plant
    /// entries whose body does not decode.
    pub fn insert_raw(&self, entry: RawEntry) -> Result<()> {
        self.lock()?.push(entry);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<RawEntry>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))
    }
}

impl EventStore for MemoryEventStore {
    fn append(&self, event: &QueuedEvent) -> Result<EntryId> {
        let entry = RawEntry::encode(EntryId::generate(), event)?;
        let id = entry.id.clone();
        self.lock()?.push(entry);
        Ok(id)
    }

    fn scan_all(&self) -> Result<Vec<RawEntry>> {
        let mut entries = self.lock()?.clone();
        // Stable sort keeps insertion order for equal arrival times.
        entries.sort_by(|a, b| a.arrival_time.total_cmp(&b.arrival_time));
        Ok(entries)
    }

    fn remove(&self, ids: &[EntryId]) -> Result<usize> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|e| !ids.contains(&e.id));
        Ok(before - entries.len())
    }
}
