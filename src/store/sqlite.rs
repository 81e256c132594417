//! SQLite-backed event store.

use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::event::{ConversationKey, EntryId, QueuedEvent};
use crate::error::{Error, Result};

use super::{EventStore, QueueStats, RawEntry};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        arrival_time REAL NOT NULL,
        body TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_events_arrival ON events(arrival_time);
"#;

/// Event store on a SQLite file in WAL mode.
///
/// Each operation opens its own connection, so producers and the consumer
/// only contend on SQLite's locks, never on a shared handle.
#[derive(Debug, Clone)]
pub struct SqliteEventStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteEventStore {
    /// Open (and create if needed) the store. Fails if the database is
    /// unreachable rather than returning a store that looks empty.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { path, busy_timeout };
        let conn = store.connect()?;
        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| Error::store("enable wal", e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::store("init", e))?;

        tracing::debug!("Opened event store at {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::store("open", e))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| Error::store("busy timeout", e))?;
        Ok(conn)
    }
}

impl EventStore for SqliteEventStore {
    fn append(&self, event: &QueuedEvent) -> Result<EntryId> {
        let entry = RawEntry::encode(EntryId::generate(), event)?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO events (id, user_id, channel_id, arrival_time, body) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id.0,
                entry.key.user_id,
                entry.key.channel_id,
                entry.arrival_time,
                entry.body
            ],
        )
        .map_err(|e| Error::store("insert event", e))?;

        tracing::debug!("Appended event {} for {}", entry.id, entry.key);
        Ok(entry.id)
    }

    fn scan_all(&self) -> Result<Vec<RawEntry>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, channel_id, arrival_time, body FROM events ORDER BY arrival_time ASC, rowid ASC",
            )
            .map_err(|e| Error::store("prepare scan", e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RawEntry {
                    id: EntryId(row.get(0)?),
                    key: ConversationKey {
                        user_id: row.get(1)?,
                        channel_id: row.get(2)?,
                    },
                    arrival_time: row.get(3)?,
                    body: row.get(4)?,
                })
            })
            .map_err(|e| Error::store("scan", e))?;

        let entries = rows
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::store("read row", e))?;
        Ok(entries)
    }

    fn remove(&self, ids: &[EntryId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connect()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::store("begin remove", e))?;
        let mut removed = 0;
        {
            let mut stmt = tx
                .prepare("DELETE FROM events WHERE id = ?1")
                .map_err(|e| Error::store("prepare remove", e))?;
            for id in ids {
                removed += stmt
                    .execute(params![id.0])
                    .map_err(|e| Error::store("remove event", e))?;
            }
        }
        tx.commit().map_err(|e| Error::store("commit remove", e))?;

        tracing::debug!("Removed {} of {} requested entries", removed, ids.len());
        Ok(removed)
    }

    fn stats(&self) -> Result<QueueStats> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT user_id || char(31) || channel_id), MIN(arrival_time) FROM events",
            [],
            |row| {
                Ok(QueueStats {
                    entries: row.get::<_, i64>(0)? as usize,
                    conversations: row.get::<_, i64>(1)? as usize,
                    oldest_arrival: row.get(2)?,
                })
            },
        )
        .map_err(|e| Error::store("stats", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::SenderRole;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> SqliteEventStore {
        SqliteEventStore::open(dir.path().join("queue.db"), Duration::from_secs(5)).unwrap()
    }

    fn event(user: &str, text: &str, t: f64) -> QueuedEvent {
        QueuedEvent::new(ConversationKey::new(user, "store"), SenderRole::User, text, t)
    }

    #[test]
    fn test_scan_orders_by_arrival() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.append(&event("a", "second", 2.0)).unwrap();
        store.append(&event("b", "first", 1.0)).unwrap();
        store.append(&event("a", "third", 3.0)).unwrap();

        let entries = store.scan_all().unwrap();
        let texts: Vec<String> = entries
            .iter()
            .map(|e| e.decode().unwrap().event.content)
            .collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_remove_is_exact_and_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let a = store.append(&event("a", "one", 1.0)).unwrap();
        let b = store.append(&event("a", "two", 2.0)).unwrap();

        assert_eq!(store.remove(&[a.clone()]).unwrap(), 1);
        assert_eq!(store.remove(&[a]).unwrap(), 0);

        let remaining = store.scan_all().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = open_store(&temp_dir);
            store.append(&event("a", "persisted", 1.0)).unwrap();
        }
        let store = open_store(&temp_dir);
        assert_eq!(store.scan_all().unwrap().len(), 1);
    }

    #[test]
    fn test_stats() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        store.append(&event("a", "1", 4.0)).unwrap();
        store.append(&event("a", "2", 5.0)).unwrap();
        store.append(&event("b", "3", 6.0)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.conversations, 2);
        assert_eq!(stats.oldest_arrival, Some(4.0));
    }

    #[test]
    fn test_open_fails_on_unusable_path() {
        let temp_dir = TempDir::new().unwrap();
        // A directory cannot be opened as a database file.
        let result = SqliteEventStore::open(temp_dir.path(), Duration::from_millis(100));
        assert!(matches!(result, Err(Error::Store(_))));
    }

    #[test]
    fn test_concurrent_appends() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&temp_dir));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        store
                            .append(&event(&format!("user{}", i), "hi", (i * 10 + j) as f64))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.scan_all().unwrap().len(), 80);
    }
}
