//! The thread manager (spec §4.2, C3): owns every `Thread` object for its
//! active lifetime, resumption, and compaction. External components hold
//! only a thread ID and query through here (spec §4.2 "Ownership").
//!
//! The resolve-or-create fast-path/slow-path locking shape follows
//! `sa_sessions::store::SessionStore::resolve_or_create`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use lace_store::EventStore;
use lace_types::event::{Event, EventType};
use lace_types::ids::{is_valid_thread_id, mint_thread_id};
use lace_types::thread::Thread;

use crate::bus::{BusEvent, EventBus};
use crate::error::Result;
use crate::tokens::estimate_thread_prompt_tokens;

pub struct ThreadManager {
    store: EventStore,
    bus: EventBus,
    threads: RwLock<HashMap<String, Thread>>,
    /// Fraction of a model's context window at which `needsCompaction`
    /// starts returning true (spec §4.6: "within 80% of contextWindow").
    token_budget_fraction: f64,
    /// Number of turns carried verbatim into a compacted thread (spec §4.2
    /// default N=5 turns).
    compaction_tail_turns: usize,
}

impl ThreadManager {
    pub fn new(
        store: EventStore,
        bus: EventBus,
        token_budget_fraction: f64,
        compaction_tail_turns: usize,
    ) -> Self {
        Self {
            store,
            bus,
            threads: RwLock::new(HashMap::new()),
            token_budget_fraction,
            compaction_tail_turns,
        }
    }

    /// Spec §4.2 `resumeOrCreate`: fails soft on invalid/unknown hints — a
    /// bogus `--continue <id>` just starts a fresh thread rather than
    /// erroring (spec §4.2, §7 `InvalidThreadId`).
    pub async fn resume_or_create(&self, id_hint: Option<&str>) -> Result<(String, bool)> {
        if let Some(id) = id_hint {
            if is_valid_thread_id(id) {
                if let Some(thread) = self.load_into_cache(id).await? {
                    return Ok((thread.id, true));
                }
            }
        }

        let new_id = mint_thread_id();
        let thread = self.store.create_thread(new_id.clone(), None).await?;
        self.threads.write().insert(new_id.clone(), thread);
        Ok((new_id, false))
    }

    async fn load_into_cache(&self, thread_id: &str) -> Result<Option<Thread>> {
        {
            let cache = self.threads.read();
            if let Some(thread) = cache.get(thread_id) {
                return Ok(Some(thread.clone()));
            }
        }

        match self.store.thread_exists(thread_id).await? {
            true => {
                let thread = self.store.load_thread(thread_id).await?;
                self.threads.write().insert(thread_id.to_string(), thread.clone());
                Ok(Some(thread))
            }
            false => Ok(None),
        }
    }

    /// Spec §4.2 `addEvent`: in-memory append, write-through to the store,
    /// publish on the bus.
    pub async fn add_event(&self, thread_id: &str, data: EventType) -> Result<Event> {
        let event = self.store.append(thread_id, data).await?;

        {
            let mut cache = self.threads.write();
            if let Some(thread) = cache.get_mut(thread_id) {
                thread.events.push(event.clone());
                thread.updated_at = event.timestamp;
            }
        }

        self.bus.publish(BusEvent::ThreadEvent {
            thread_id: thread_id.to_string(),
            event_id: event.event_id,
            type_tag: event.data.type_tag().to_string(),
        });

        Ok(event)
    }

    /// Spec §4.2 `getEvents`: the in-memory view, loaded lazily.
    pub async fn get_events(&self, thread_id: &str) -> Result<Vec<Event>> {
        match self.load_into_cache(thread_id).await? {
            Some(thread) => Ok(thread.events),
            None => Err(crate::error::Error::InvalidThreadId(thread_id.to_string())),
        }
    }

    pub async fn get_latest_thread_id(&self) -> Result<Option<String>> {
        Ok(self.store.latest_thread_id().await?)
    }

    /// Spec §4.2 `needsCompaction`: true once the projected prompt exceeds
    /// `token_budget_fraction` of the model's context window.
    pub async fn needs_compaction(&self, thread_id: &str, context_window: u32) -> Result<bool> {
        let thread = self
            .load_into_cache(thread_id)
            .await?
            .ok_or_else(|| crate::error::Error::InvalidThreadId(thread_id.to_string()))?;
        let estimated = estimate_thread_prompt_tokens(&thread);
        let threshold = (context_window as f64 * self.token_budget_fraction) as u32;
        Ok(estimated >= threshold)
    }

    /// Spec §4.2 `compact`: allocate a new thread linked via
    /// `compactionOfThreadId`, seeded with a `SYSTEM_MESSAGE` summary and
    /// the tail window verbatim. The original thread is untouched.
    pub async fn compact(&self, thread_id: &str, summary: impl Into<String>) -> Result<Thread> {
        let original = self
            .load_into_cache(thread_id)
            .await?
            .ok_or_else(|| crate::error::Error::InvalidThreadId(thread_id.to_string()))?;

        let tail_start = tail_boundary(&original.events, self.compaction_tail_turns);
        let tail_events: Vec<EventType> = original.events[tail_start..]
            .iter()
            .map(|e| e.data.clone())
            .collect();

        let compacted = self.store.compact(thread_id, summary, tail_events).await?;
        self.threads
            .write()
            .insert(compacted.id.clone(), compacted.clone());
        Ok(compacted)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }
}

/// Find the index where a `tail_turns`-turn suffix of `events` begins (spec
/// §3.3: a compacted tail must never split a turn and leave a `TOOL_RESULT`
/// without its `TOOL_CALL`). A turn starts at a `USER_MESSAGE`, so this walks
/// backward counting them and stops at the `tail_turns`-th one found, or at
/// 0 if the thread has fewer turns than that.
fn tail_boundary(events: &[Event], tail_turns: usize) -> usize {
    if tail_turns == 0 {
        return events.len();
    }

    let mut boundary = 0;
    let mut turns_seen = 0;
    for (idx, event) in events.iter().enumerate().rev() {
        if matches!(event.data, EventType::UserMessage(_)) {
            turns_seen += 1;
            boundary = idx;
            if turns_seen == tail_turns {
                break;
            }
        }
    }
    boundary
}

pub type SharedThreadManager = Arc<ThreadManager>;
