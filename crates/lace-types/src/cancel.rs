//! Turn-scoped cancellation tokens with group fan-out (spec §4.6, §5).
//!
//! Ported from `sa_gateway::runtime::cancel`: the token itself is an
//! `AtomicBool` behind an `Arc`; the map additionally tracks parent→child
//! groups so cancelling a parent turn cascades to its delegated children
//! (spec §4.8: "cancelling the parent turn cancels the child turn
//! transitively"). Lives in `lace-types` rather than `lace-engine` so that
//! `lace-tools` can race tool execution against the same token the engine
//! cancels (spec §4.4 "tool executions SHARE the turn's cancellation
//! signal") without a dependency cycle between the two crates.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once this token is cancelled; resolves immediately if it
    /// already is. Meant to be raced via `tokio::select!` against a
    /// provider call or tool invocation (spec §5 "suspension points").
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the active cancel token per thread ID, with group support for
/// cascading parent→child cancellation across delegated turns.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, thread_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(thread_id.to_owned(), token.clone());
        token
    }

    /// Cancel the running turn for `thread_id`, cascading to every child
    /// thread registered in its group. Returns `true` if a token was found.
    pub fn cancel(&self, thread_id: &str) -> bool {
        let found = if let Some(token) = self.tokens.lock().get(thread_id) {
            token.cancel();
            true
        } else {
            false
        };

        if let Some(children) = self.groups.lock().get(thread_id) {
            let tokens = self.tokens.lock();
            for child in children {
                if let Some(child_token) = tokens.get(child) {
                    child_token.cancel();
                }
            }
        }

        found
    }

    pub fn remove(&self, thread_id: &str) {
        self.tokens.lock().remove(thread_id);
        self.groups.lock().remove(thread_id);
    }

    pub fn is_running(&self, thread_id: &str) -> bool {
        self.tokens.lock().contains_key(thread_id)
    }

    pub fn add_to_group(&self, parent_thread_id: &str, child_thread_id: &str) {
        self.groups
            .lock()
            .entry(parent_thread_id.to_owned())
            .or_default()
            .insert(child_thread_id.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_cascades_to_delegated_children() {
        let map = CancelMap::new();
        let parent = map.register("parent");
        let child = map.register("child");
        map.add_to_group("parent", "child");

        map.cancel("parent");
        assert!(parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn cancel_nonexistent_thread_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("ghost"));
    }

    #[test]
    fn remove_clears_token_and_group() {
        let map = CancelMap::new();
        map.register("t1");
        map.add_to_group("t1", "child");
        map.remove("t1");
        assert!(!map.is_running("t1"));
        assert!(!map.cancel("t1"));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_immediately_if_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_millis(50), token.cancelled())
            .await
            .expect("cancelled() should resolve without waiting");
    }

    #[tokio::test]
    async fn cancelled_future_wakes_on_later_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        token.cancel();

        tokio::time::timeout(std::time::Duration::from_millis(200), handle)
            .await
            .expect("cancelled() should have woken the waiting task")
            .expect("task should not panic");
    }
}
