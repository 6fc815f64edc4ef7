//! Synchronous SQLite access (spec §4.1). Schema-on-write: the two tables
//! mirror the event/thread shapes exactly, there is no separate parsing
//! layer — the store's job is to persist what `lace-types::Event` already
//! validated, not to reinterpret it.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use lace_types::event::{Event, EventType};
use lace_types::ids::EventId;
use lace_types::thread::Thread;

use crate::error::{Error, Result};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                parent_id TEXT,
                compaction_of TEXT
            );

            CREATE TABLE IF NOT EXISTS events (
                thread_id TEXT NOT NULL,
                event_id INTEGER NOT NULL,
                ts TEXT NOT NULL,
                type TEXT NOT NULL,
                data_blob TEXT NOT NULL,
                PRIMARY KEY (thread_id, event_id),
                FOREIGN KEY (thread_id) REFERENCES threads(id)
            );

            CREATE INDEX IF NOT EXISTS idx_threads_updated_at ON threads(updated_at DESC);
            "#,
        )?;
        Ok(())
    }

    pub fn create_thread(
        &self,
        id: &str,
        parent_id: Option<&str>,
        compaction_of: Option<&str>,
    ) -> Result<Thread> {
        let now = Utc::now();
        self.conn.execute(
            r#"
            INSERT INTO threads (id, created_at, updated_at, parent_id, compaction_of)
            VALUES (?1, ?2, ?2, ?3, ?4)
            "#,
            params![id, now.to_rfc3339(), parent_id, compaction_of],
        )?;
        Ok(Thread {
            id: id.to_string(),
            created_at: now,
            updated_at: now,
            parent_thread_id: parent_id.map(str::to_string),
            compaction_of_thread_id: compaction_of.map(str::to_string),
            events: Vec::new(),
        })
    }

    pub fn thread_exists(&self, id: &str) -> Result<bool> {
        let exists: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM threads WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(exists.is_some())
    }

    /// Allocate the next `event_id` for `thread_id`, write the row, bump
    /// `updated_at`. Returns the full event (spec §4.1 `append`).
    pub fn append(&self, thread_id: &str, data: EventType) -> Result<Event> {
        if !data.is_persistable() {
            // Callers filter AGENT_TOKEN before calling append; this guards
            // against accidental misuse rather than expected control flow.
            return Err(Error::NotPersistable("AGENT_TOKEN"));
        }

        let next_id: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(event_id), 0) + 1 FROM events WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )?;
        let now = Utc::now();
        let blob = serde_json::to_string(&data.data_to_json())?;

        self.conn.execute(
            r#"
            INSERT INTO events (thread_id, event_id, ts, type, data_blob)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![thread_id, next_id, now.to_rfc3339(), data.type_tag(), blob],
        )?;
        self.conn.execute(
            "UPDATE threads SET updated_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), thread_id],
        )?;

        Ok(Event {
            event_id: next_id,
            thread_id: thread_id.to_string(),
            timestamp: now,
            data,
        })
    }

    /// Events in ascending `event_id` order (spec §4.1 `getEvents`).
    pub fn get_events(&self, thread_id: &str) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT event_id, ts, type, data_blob
            FROM events
            WHERE thread_id = ?1
            ORDER BY event_id ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![thread_id], |row| {
                let event_id: EventId = row.get(0)?;
                let ts: String = row.get(1)?;
                let type_tag: String = row.get(2)?;
                let blob: String = row.get(3)?;
                Ok((event_id, ts, type_tag, blob))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(event_id, ts, type_tag, blob)| {
                let data: serde_json::Value = serde_json::from_str(&blob)?;
                let timestamp = DateTime::parse_from_rfc3339(&ts)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                Ok(Event {
                    event_id,
                    thread_id: thread_id.to_string(),
                    timestamp,
                    data: EventType::from_stored(&type_tag, data),
                })
            })
            .collect()
    }

    /// Thread IDs ordered by `updated_at` descending (spec §4.1 `listThreads`).
    pub fn list_threads(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM threads ORDER BY updated_at DESC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn latest_thread_id(&self) -> Result<Option<String>> {
        Ok(self.list_threads()?.into_iter().next())
    }

    pub fn thread_metadata(
        &self,
        id: &str,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>, Option<String>, Option<String>)>> {
        let row = self
            .conn
            .query_row(
                "SELECT created_at, updated_at, parent_id, compaction_of FROM threads WHERE id = ?1",
                params![id],
                |row| {
                    let created: String = row.get(0)?;
                    let updated: String = row.get(1)?;
                    let parent: Option<String> = row.get(2)?;
                    let compaction_of: Option<String> = row.get(3)?;
                    Ok((created, updated, parent, compaction_of))
                },
            )
            .optional()?;

        Ok(row.map(|(created, updated, parent, compaction_of)| {
            let parse = |s: &str| {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now())
            };
            (parse(&created), parse(&updated), parent, compaction_of)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_allocates_sequential_event_ids() {
        let db = Database::open_in_memory().unwrap();
        db.create_thread("lace_20260726_abcdef", None, None).unwrap();
        let e1 = db
            .append("lace_20260726_abcdef", EventType::UserMessage("hi".into()))
            .unwrap();
        let e2 = db
            .append(
                "lace_20260726_abcdef",
                EventType::AgentMessage("hello".into()),
            )
            .unwrap();
        assert_eq!(e1.event_id, 1);
        assert_eq!(e2.event_id, 2);
    }

    #[test]
    fn get_events_returns_ascending_order() {
        let db = Database::open_in_memory().unwrap();
        db.create_thread("lace_20260726_abcdef", None, None).unwrap();
        db.append("lace_20260726_abcdef", EventType::UserMessage("a".into()))
            .unwrap();
        db.append("lace_20260726_abcdef", EventType::AgentMessage("b".into()))
            .unwrap();
        let events = db.get_events("lace_20260726_abcdef").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_id, 1);
        assert_eq!(events[1].event_id, 2);
    }

    #[test]
    fn list_threads_orders_by_updated_at_desc() {
        let db = Database::open_in_memory().unwrap();
        db.create_thread("lace_20260726_aaaaaa", None, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        db.create_thread("lace_20260726_bbbbbb", None, None).unwrap();
        let ids = db.list_threads().unwrap();
        assert_eq!(ids[0], "lace_20260726_bbbbbb");
    }

    #[test]
    fn unknown_thread_has_no_events() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_events("lace_20260726_zzzzzz").unwrap().len(), 0);
    }
}
