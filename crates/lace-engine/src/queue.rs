//! Input admission queue (spec §4.7, C8): per-thread FIFO with a
//! high-priority bypass lane. Mirrors the teacher's single-slot
//! `SessionLockMap` (`sa_gateway::runtime::session_lock`) in spirit — "only
//! one turn runs per thread at a time" — but exposes an explicit queue
//! instead of a blocking semaphore permit, since spec §4.7 wants callers to
//! inspect `getQueueStats()` rather than just waiting on acquire.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::bus::{BusEvent, EventBus};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub entry_id: String,
    pub thread_id: String,
    pub text: String,
    pub high_priority: bool,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub queue_length: usize,
    pub high_priority_count: usize,
}

#[derive(Default)]
struct ThreadQueue {
    busy: bool,
    entries: VecDeque<QueuedMessage>,
}

/// Admission rules (spec §4.7):
/// - thread idle → dispatch immediately, never enters the queue
/// - thread busy, queueing allowed → enqueue (high priority splices ahead
///   of normal-priority entries, FIFO within each priority band)
/// - thread busy, queueing disallowed → `BusyRejected`
pub struct InputQueue {
    threads: Mutex<HashMap<String, ThreadQueue>>,
    bus: EventBus,
    allow_queueing: bool,
}

impl InputQueue {
    pub fn new(bus: EventBus, allow_queueing: bool) -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
            bus,
            allow_queueing,
        }
    }

    /// Admit `text` for `thread_id`. Returns `Ok(None)` when the caller
    /// should dispatch a turn immediately (thread was idle) and
    /// `Ok(Some(message))` when it was queued for later draining via
    /// [`InputQueue::next`].
    pub fn admit(
        &self,
        thread_id: &str,
        text: impl Into<String>,
        high_priority: bool,
    ) -> Result<Option<QueuedMessage>> {
        let mut threads = self.threads.lock();
        let queue = threads.entry(thread_id.to_owned()).or_default();

        if !queue.busy {
            queue.busy = true;
            return Ok(None);
        }

        if !self.allow_queueing {
            return Err(Error::BusyRejected(thread_id.to_owned()));
        }

        let message = QueuedMessage {
            entry_id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_owned(),
            text: text.into(),
            high_priority,
        };

        if high_priority {
            let split = queue
                .entries
                .iter()
                .position(|m| !m.high_priority)
                .unwrap_or(queue.entries.len());
            queue.entries.insert(split, message.clone());
        } else {
            queue.entries.push_back(message.clone());
        }

        self.bus.publish(BusEvent::MessageQueued {
            thread_id: thread_id.to_owned(),
            queue_length: queue.entries.len(),
            entry_id: message.entry_id.clone(),
        });

        Ok(Some(message))
    }

    /// Pop the next admitted message for `thread_id`, or mark the thread
    /// idle again if the queue has drained. Call after a turn completes.
    pub fn next(&self, thread_id: &str) -> Option<QueuedMessage> {
        let mut threads = self.threads.lock();
        let queue = threads.entry(thread_id.to_owned()).or_default();

        match queue.entries.pop_front() {
            Some(message) => Some(message),
            None => {
                queue.busy = false;
                None
            }
        }
    }

    pub fn stats(&self, thread_id: &str) -> QueueStats {
        let threads = self.threads.lock();
        match threads.get(thread_id) {
            Some(queue) => QueueStats {
                queue_length: queue.entries.len(),
                high_priority_count: queue.entries.iter().filter(|m| m.high_priority).count(),
            },
            None => QueueStats::default(),
        }
    }

    pub fn is_busy(&self, thread_id: &str) -> bool {
        self.threads
            .lock()
            .get(thread_id)
            .map(|q| q.busy)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_admission_dispatches_immediately() {
        let queue = InputQueue::new(EventBus::default(), true);
        let result = queue.admit("t1", "hello", false).unwrap();
        assert!(result.is_none());
        assert!(queue.is_busy("t1"));
    }

    #[test]
    fn second_admission_while_busy_is_queued() {
        let queue = InputQueue::new(EventBus::default(), true);
        queue.admit("t1", "first", false).unwrap();
        let queued = queue.admit("t1", "second", false).unwrap();
        assert!(queued.is_some());
        assert_eq!(queue.stats("t1").queue_length, 1);
    }

    #[test]
    fn busy_without_queueing_rejects() {
        let queue = InputQueue::new(EventBus::default(), false);
        queue.admit("t1", "first", false).unwrap();
        let result = queue.admit("t1", "second", false);
        assert!(matches!(result, Err(Error::BusyRejected(_))));
    }

    #[test]
    fn high_priority_splices_ahead_of_normal_entries() {
        let queue = InputQueue::new(EventBus::default(), true);
        queue.admit("t1", "dispatching", false).unwrap();
        queue.admit("t1", "normal", false).unwrap();
        queue.admit("t1", "urgent", true).unwrap();

        let stats = queue.stats("t1");
        assert_eq!(stats.queue_length, 2);
        assert_eq!(stats.high_priority_count, 1);

        let first = queue.next("t1").unwrap();
        assert_eq!(first.text, "urgent");
        let second = queue.next("t1").unwrap();
        assert_eq!(second.text, "normal");
    }

    #[test]
    fn draining_empty_queue_marks_thread_idle() {
        let queue = InputQueue::new(EventBus::default(), true);
        queue.admit("t1", "first", false).unwrap();
        assert!(queue.next("t1").is_none());
        assert!(!queue.is_busy("t1"));

        let result = queue.admit("t1", "new turn", false).unwrap();
        assert!(result.is_none());
    }
}
