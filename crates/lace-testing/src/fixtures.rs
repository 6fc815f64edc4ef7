//! Fixture helpers for tests that need a real (file-backed) or in-memory
//! event store, a tool executor, and an engine wired from those.

use std::sync::Arc;

use tempfile::TempDir;

use lace_engine::{CancelMap, EventBus, ThreadManager};
use lace_store::EventStore;
use lace_tools::{ToolExecutor, ToolRegistry};

/// An in-memory store, for tests that don't need resumption across a
/// process restart.
pub async fn temp_store() -> EventStore {
    EventStore::open_in_memory()
        .await
        .expect("open in-memory event store")
}

/// A file-backed store plus the `TempDir` keeping it alive, for tests that
/// exercise resumption (spec §8 S1: "resume across restart").
pub async fn file_backed_store() -> (TempDir, EventStore) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("lace.db");
    let store = EventStore::open(&path).await.expect("open file-backed event store");
    (dir, store)
}

/// A `ThreadManager` over an in-memory store, with default compaction
/// settings (80% token budget fraction, 5-event tail window).
pub async fn thread_manager() -> Arc<ThreadManager> {
    Arc::new(ThreadManager::new(temp_store().await, EventBus::default(), 0.8, 5))
}

/// A `ToolExecutor` with an empty registry and no approval gate, useful
/// as a baseline that tests then register stub tools into.
pub fn empty_tool_executor() -> Arc<ToolExecutor> {
    Arc::new(ToolExecutor::new(ToolRegistry::new(), None))
}

pub fn cancel_map() -> Arc<CancelMap> {
    Arc::new(CancelMap::new())
}
