//! Async-facing event store (spec §4.1). `Database` is a plain blocking
//! rusqlite wrapper; `EventStore` is the handle the rest of the workspace
//! talks to, offloading each call to a blocking thread so the async
//! engine never stalls on SQLite I/O.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use lace_types::event::{Event, EventType};
use lace_types::ids::mint_thread_id;
use lace_types::thread::Thread;

use crate::db::Database;
use crate::error::{Error, Result};

/// A SQLite-backed, append-only event store (spec §4.1 C2).
#[derive(Clone)]
pub struct EventStore {
    db: Arc<Mutex<Database>>,
    path: Option<PathBuf>,
}

impl EventStore {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let db = run_blocking(move || Database::open(&path)).await?;
        Ok(EventStore {
            db: Arc::new(Mutex::new(db)),
            path: Some(db_path.as_ref().to_path_buf()),
        })
    }

    pub async fn open_in_memory() -> Result<Self> {
        let db = run_blocking(Database::open_in_memory).await?;
        Ok(EventStore {
            db: Arc::new(Mutex::new(db)),
            path: None,
        })
    }

    /// Where this store lives on disk, if anywhere (spec §6.4 `LACE_DB_PATH`).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn create_thread(
        &self,
        id: impl Into<String>,
        parent_id: Option<String>,
    ) -> Result<Thread> {
        let db = self.db.clone();
        let id = id.into();
        run_blocking(move || db.lock().create_thread(&id, parent_id.as_deref(), None)).await
    }

    pub async fn thread_exists(&self, id: impl Into<String>) -> Result<bool> {
        let db = self.db.clone();
        let id = id.into();
        run_blocking(move || db.lock().thread_exists(&id)).await
    }

    /// Spec §4.1 `append`: fails with `StoreUnavailable` (mapped from
    /// `Error::Sqlite`) if the backing file is unwritable. `AGENT_TOKEN`
    /// must never reach here — the engine routes it to the bus only.
    pub async fn append(&self, thread_id: impl Into<String>, data: EventType) -> Result<Event> {
        let db = self.db.clone();
        let thread_id = thread_id.into();
        run_blocking(move || db.lock().append(&thread_id, data)).await
    }

    /// Spec §4.1 `getEvents`, ascending `event_id` order.
    pub async fn get_events(&self, thread_id: impl Into<String>) -> Result<Vec<Event>> {
        let db = self.db.clone();
        let thread_id = thread_id.into();
        run_blocking(move || db.lock().get_events(&thread_id)).await
    }

    /// Spec §4.1 `listThreads`, ordered by `updated_at` descending.
    pub async fn list_threads(&self) -> Result<Vec<String>> {
        let db = self.db.clone();
        run_blocking(move || db.lock().list_threads()).await
    }

    pub async fn latest_thread_id(&self) -> Result<Option<String>> {
        let db = self.db.clone();
        run_blocking(move || db.lock().latest_thread_id()).await
    }

    /// Loads a full `Thread` (metadata + events) from the store.
    pub async fn load_thread(&self, thread_id: impl Into<String>) -> Result<Thread> {
        let thread_id = thread_id.into();
        let db = self.db.clone();
        let id_for_meta = thread_id.clone();
        let meta = run_blocking(move || db.lock().thread_metadata(&id_for_meta)).await?;
        let (created_at, updated_at, parent_thread_id, compaction_of_thread_id) =
            meta.ok_or_else(|| Error::ThreadNotFound(thread_id.clone()))?;
        let events = self.get_events(thread_id.clone()).await?;
        Ok(Thread {
            id: thread_id,
            created_at,
            updated_at,
            parent_thread_id,
            compaction_of_thread_id,
            events,
        })
    }

    /// Spec §4.2 `compact`: allocate a new thread linked via
    /// `compactionOfThreadId`, seeded with a `SYSTEM_MESSAGE` summary
    /// followed by the verbatim tail events. The original thread is
    /// untouched.
    pub async fn compact(
        &self,
        original_thread_id: impl Into<String>,
        summary: impl Into<String>,
        tail_events: Vec<EventType>,
    ) -> Result<Thread> {
        let original_thread_id = original_thread_id.into();
        let new_id = mint_thread_id();
        let db = self.db.clone();
        let new_id_for_create = new_id.clone();
        let original_for_create = original_thread_id.clone();
        run_blocking(move || {
            db.lock().create_thread(
                &new_id_for_create,
                None,
                Some(original_for_create.as_str()),
            )
        })
        .await?;

        self.append(new_id.clone(), EventType::SystemMessage(summary.into()))
            .await?;
        for event in tail_events {
            self.append(new_id.clone(), event).await?;
        }

        self.load_thread(new_id).await
    }

    /// Flush and release handles (spec §4.1 `close`). Idempotent: dropping
    /// the last `Arc` closes the underlying connection anyway, so this is
    /// a documented no-op kept for API parity with the spec.
    pub async fn close(&self) {}
}

async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_err) => {
            tracing::error!(error = %join_err, "store blocking task panicked");
            Err(Error::Internal(join_err.to_string()))
        }
    }
}
