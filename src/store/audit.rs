//! Eviction audit log.
//!
//! Eviction drops a conversation's queued events for good. When enabled,
//! the dropped entries are copied here first so an operator can see what
//! was lost.

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use crate::core::event::ConversationKey;
use crate::error::{Error, Result};

use super::RawEntry;

pub trait EvictionAudit: Send + Sync {
    fn record_eviction(
        &self,
        key: &ConversationKey,
        attempts: u32,
        entries: &[RawEntry],
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct EvictionRecord {
    pub id: String,
    pub ts: i64,
    pub conversation_key: String,
    pub attempts: u32,
    pub entry_count: usize,
    pub bodies: Vec<String>,
}

/// Audit log stored in a SQLite `evictions` table.
#[derive(Debug, Clone)]
pub struct SqliteEvictionAudit {
    path: PathBuf,
}

impl SqliteEvictionAudit {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let audit = Self {
            path: path.as_ref().to_path_buf(),
        };
        audit
            .connect()?
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS evictions (
                    id TEXT PRIMARY KEY,
                    ts INTEGER NOT NULL,
                    conversation_key TEXT NOT NULL,
                    attempts INTEGER NOT NULL,
                    entry_count INTEGER NOT NULL,
                    bodies TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_evictions_ts ON evictions(ts);
                "#,
            )
            .map_err(|e| Error::store("audit init", e))?;
        Ok(audit)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(|e| Error::store("audit open", e))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| Error::store("audit busy timeout", e))?;
        Ok(conn)
    }

    /// Most recent evictions first.
    pub fn recent(&self, limit: usize) -> Result<Vec<EvictionRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, ts, conversation_key, attempts, entry_count, bodies FROM evictions ORDER BY ts DESC, id DESC LIMIT ?1",
            )
            .map_err(|e| Error::store("audit prepare", e))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let bodies: String = row.get(5)?;
                Ok((
                    EvictionRecord {
                        id: row.get(0)?,
                        ts: row.get(1)?,
                        conversation_key: row.get(2)?,
                        attempts: row.get(3)?,
                        entry_count: row.get::<_, i64>(4)? as usize,
                        bodies: Vec::new(),
                    },
                    bodies,
                ))
            })
            .map_err(|e| Error::store("audit query", e))?;

        let mut records = Vec::new();
        for row in rows {
            let (mut record, bodies) = row.map_err(|e| Error::store("audit read", e))?;
            record.bodies = serde_json::from_str(&bodies)?;
            records.push(record);
        }
        Ok(records)
    }
}

impl EvictionAudit for SqliteEvictionAudit {
    fn record_eviction(
        &self,
        key: &ConversationKey,
        attempts: u32,
        entries: &[RawEntry],
    ) -> Result<()> {
        let bodies: Vec<&str> = entries.iter().map(|e| e.body.as_str()).collect();
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO evictions (id, ts, conversation_key, attempts, entry_count, bodies) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ulid::Ulid::new().to_string(),
                chrono::Utc::now().timestamp_millis(),
                key.to_string(),
                attempts,
                entries.len() as i64,
                serde_json::to_string(&bodies)?
            ],
        )
        .map_err(|e| Error::store("audit insert", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::EntryId;
    use tempfile::TempDir;

    #[test]
    fn test_record_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let audit = SqliteEvictionAudit::open(temp_dir.path().join("queue.db")).unwrap();
        let key = ConversationKey::new("u", "c");
        let entries = vec![RawEntry {
            id: EntryId::generate(),
            key: key.clone(),
            arrival_time: 1.0,
            body: r#"{"sender_role":"user","content":"hi"}"#.to_string(),
        }];

        audit.record_eviction(&key, 4, &entries).unwrap();

        let records = audit.recent(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].conversation_key, "u_c");
        assert_eq!(records[0].attempts, 4);
        assert_eq!(records[0].entry_count, 1);
        assert_eq!(records[0].bodies, vec![entries[0].body.clone()]);
    }
}
