//! End-to-end scenarios exercising the turn engine, approval gate, and
//! input queue together (spec §8). Each test wires a `TurnEngine` over a
//! real (usually in-memory) event store and a `ScriptedProvider`, then
//! asserts on the persisted event log and/or the returned `TurnOutcome`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use lace_engine::{
    CancelMap, EventBus, InputQueue, InteractiveGate, ThreadManager, TurnEngine, TurnEngineConfig,
};
use lace_testing::{ScriptedProvider, ScriptedTurn, StubTool};
use lace_tools::approval::StaticGate;
use lace_tools::{Tool, ToolExecutor, ToolRegistry};
use lace_types::session::{ApprovalDecision, SessionPolicy};
use lace_types::tool::{ToolAnnotations, ToolDefinition};

fn engine(threads: Arc<ThreadManager>, tools: Arc<ToolExecutor>, cancels: Arc<CancelMap>) -> TurnEngine {
    TurnEngine::new(threads.clone(), tools, cancels, threads.bus().clone(), TurnEngineConfig::default())
}

fn policy() -> Arc<tokio::sync::Mutex<SessionPolicy>> {
    Arc::new(tokio::sync::Mutex::new(SessionPolicy::new(100_000)))
}

// ── S1: resume across restart ───────────────────────────────────────────

#[tokio::test]
async fn s1_resume_across_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("lace.db");

    let first_thread_id = {
        let store = lace_store::EventStore::open(&db_path).await.unwrap();
        let threads = Arc::new(ThreadManager::new(store, EventBus::default(), 0.8, 5));
        let tools = Arc::new(ToolExecutor::new(ToolRegistry::new(), None));
        let cancels = Arc::new(CancelMap::new());
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::final_text("hello there")]));

        let (thread_id, _) = threads.resume_or_create(None).await.unwrap();
        let outcome = engine(threads.clone(), tools, cancels)
            .run_turn(&thread_id, "first turn, please", provider, None, policy())
            .await
            .unwrap();
        assert!(!outcome.aborted);
        outcome.final_thread_id
    };

    // Reopen the same file-backed store in a fresh `ThreadManager`, as a
    // new process would after a restart, and resume by id.
    let store = lace_store::EventStore::open(&db_path).await.unwrap();
    let threads = Arc::new(ThreadManager::new(store, EventBus::default(), 0.8, 5));
    let (resumed_id, existed) = threads.resume_or_create(Some(&first_thread_id)).await.unwrap();
    assert!(existed);
    assert_eq!(resumed_id, first_thread_id);

    let events = threads.get_events(&resumed_id).await.unwrap();
    assert!(events.iter().any(|e| matches!(&e.data, lace_types::event::EventType::UserMessage(t) if t == "first turn, please")));
    assert!(events.iter().any(|e| matches!(&e.data, lace_types::event::EventType::AgentMessage(t) if t == "hello there")));

    // A bogus hint falls back to minting a fresh thread rather than erroring.
    let (fresh_id, existed) = threads.resume_or_create(Some("not-a-real-id")).await.unwrap();
    assert!(!existed);
    assert_ne!(fresh_id, resumed_id);
}

// ── S2: tool-call round trip ─────────────────────────────────────────────

#[tokio::test]
async fn s2_tool_call_round_trip() {
    let store = lace_store::EventStore::open_in_memory().await.unwrap();
    let threads = Arc::new(ThreadManager::new(store, EventBus::default(), 0.8, 5));

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(StubTool::succeeding("get_weather", "72F and sunny")));
    let tools = Arc::new(ToolExecutor::new(registry, None));
    let cancels = Arc::new(CancelMap::new());

    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::tool_call("call-1", "get_weather", json!({"city": "Boston"})),
        ScriptedTurn::final_text("It's 72F and sunny in Boston."),
    ]));

    let (thread_id, _) = threads.resume_or_create(None).await.unwrap();
    let outcome = engine(threads.clone(), tools, cancels)
        .run_turn(&thread_id, "what's the weather in Boston?", provider, None, policy())
        .await
        .unwrap();

    assert!(!outcome.aborted);
    assert_eq!(outcome.final_text, "It's 72F and sunny in Boston.");

    let events = threads.get_events(&outcome.final_thread_id).await.unwrap();
    let tags: Vec<&str> = events.iter().map(|e| e.data.type_tag()).collect();
    assert_eq!(tags, vec!["USER_MESSAGE", "TOOL_CALL", "TOOL_RESULT", "AGENT_MESSAGE"]);
}

// ── S3: abort during tool execution ──────────────────────────────────────

/// A tool that sleeps before returning, so a test can cancel the turn while
/// the call is still in flight and observe the executor racing the
/// cancellation signal against the call itself.
struct SlowTool {
    delay: Duration,
}

#[async_trait::async_trait]
impl Tool for SlowTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "slow_tool".into(),
            description: "a tool that takes a while".into(),
            input_schema: json!({ "type": "object" }),
            annotations: ToolAnnotations::default(),
        }
    }

    async fn call(&self, _arguments: serde_json::Map<String, serde_json::Value>) -> Result<String, String> {
        tokio::time::sleep(self.delay).await;
        Ok("done".into())
    }
}

#[tokio::test]
async fn s3_abort_during_tool_execution() {
    let store = lace_store::EventStore::open_in_memory().await.unwrap();
    let threads = Arc::new(ThreadManager::new(store, EventBus::default(), 0.8, 5));

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SlowTool { delay: Duration::from_secs(10) }));
    let tools = Arc::new(ToolExecutor::new(registry, None));
    let cancels = Arc::new(CancelMap::new());

    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::tool_call("call-1", "slow_tool", json!({})),
        ScriptedTurn::final_text("unreachable"),
    ]));

    let (started_id, _) = threads.resume_or_create(None).await.unwrap();

    let cancels_for_canceller = cancels.clone();
    let thread_for_canceller = started_id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancels_for_canceller.cancel(&thread_for_canceller);
    });

    let started = std::time::Instant::now();
    let outcome = tokio::time::timeout(
        Duration::from_millis(200),
        engine(threads.clone(), tools, cancels).run_turn(&started_id, "run the slow tool", provider, None, policy()),
    )
    .await
    .expect("turn should abort within 200ms, not wait out the tool's 10s sleep")
    .unwrap();

    assert!(started.elapsed() < Duration::from_millis(200));
    assert!(outcome.aborted);

    let events = threads.get_events(&outcome.final_thread_id).await.unwrap();
    let tags: Vec<&str> = events.iter().map(|e| e.data.type_tag()).collect();
    // The tool call is still in flight when the cancellation fires, so the
    // executor races it and wins: the persisted result is the synthetic
    // "aborted" one, never the tool's real "done" output.
    assert_eq!(tags, vec!["USER_MESSAGE", "TOOL_CALL", "TOOL_RESULT", "AGENT_MESSAGE"]);
    assert!(matches!(
        &events[2].data,
        lace_types::event::EventType::ToolResult { is_error, content, .. }
            if *is_error && content[0].as_text() == "aborted"
    ));
    assert!(matches!(
        &events.last().unwrap().data,
        lace_types::event::EventType::AgentMessage(t) if t == "[turn aborted]"
    ));
}

// ── S4: queued high-priority bypass ──────────────────────────────────────

#[tokio::test]
async fn s4_queued_high_priority_bypass() {
    let bus = EventBus::default();
    let queue = InputQueue::new(bus, true);

    // First message dispatches immediately; the thread is now busy.
    assert!(queue.admit("lace_20260726_abcdef", "first", false).unwrap().is_none());

    // A normal message queues behind the busy thread, then a high-priority
    // one splices ahead of it.
    let normal = queue.admit("lace_20260726_abcdef", "normal follow-up", false).unwrap();
    assert!(normal.is_some());
    let urgent = queue.admit("lace_20260726_abcdef", "urgent interrupt", true).unwrap();
    assert!(urgent.is_some());

    let stats = queue.stats("lace_20260726_abcdef");
    assert_eq!(stats.queue_length, 2);
    assert_eq!(stats.high_priority_count, 1);

    // Draining order: urgent first, then the normal entry, then idle.
    let first_drained = queue.next("lace_20260726_abcdef").unwrap();
    assert_eq!(first_drained.text, "urgent interrupt");
    let second_drained = queue.next("lace_20260726_abcdef").unwrap();
    assert_eq!(second_drained.text, "normal follow-up");
    assert!(queue.next("lace_20260726_abcdef").is_none());
    assert!(!queue.is_busy("lace_20260726_abcdef"));
}

// ── S5: approval denied ───────────────────────────────────────────────────

#[tokio::test]
async fn s5_approval_denied_via_interactive_gate() {
    let store = lace_store::EventStore::open_in_memory().await.unwrap();
    let bus = EventBus::default();
    let threads = Arc::new(ThreadManager::new(store, bus.clone(), 0.8, 5));

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(StubTool::succeeding("delete_file", "deleted").destructive()));
    let gate = Arc::new(InteractiveGate::new(bus.clone(), "thread", "turn", Duration::from_secs(5)));
    let tools = Arc::new(ToolExecutor::new(registry, Some(gate.clone())));
    let cancels = Arc::new(CancelMap::new());

    // A background task watches the bus and denies the first approval it
    // observes, simulating a user saying "no".
    let gate_for_denier = gate.clone();
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let lace_engine::BusEvent::ApprovalRequested { request_id, .. } = event {
                gate_for_denier.resolve(&request_id, ApprovalDecision::Deny);
                break;
            }
        }
    });

    let mut session_policy = SessionPolicy::new(100_000);
    session_policy
        .tool_policy
        .insert("delete_file".into(), lace_types::session::ToolPolicy::RequireApproval);
    let policy = Arc::new(tokio::sync::Mutex::new(session_policy));

    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::tool_call("call-1", "delete_file", json!({"path": "/tmp/x"})),
        ScriptedTurn::final_text("I wasn't able to delete the file."),
    ]));

    let (thread_id, _) = threads.resume_or_create(None).await.unwrap();
    let outcome = engine(threads.clone(), tools, cancels)
        .run_turn(&thread_id, "delete /tmp/x", provider, None, policy)
        .await
        .unwrap();

    assert!(!outcome.aborted);
    let events = threads.get_events(&outcome.final_thread_id).await.unwrap();
    let tool_result = events
        .iter()
        .find_map(|e| match &e.data {
            lace_types::event::EventType::ToolResult { is_error, content, .. } => Some((*is_error, content.clone())),
            _ => None,
        })
        .expect("a TOOL_RESULT event");
    assert!(tool_result.0, "denied call should produce an error result");
    assert_eq!(tool_result.1[0].as_text(), "denied by approval policy");
}

#[tokio::test]
async fn s5_approval_denied_via_static_gate() {
    let store = lace_store::EventStore::open_in_memory().await.unwrap();
    let threads = Arc::new(ThreadManager::new(store, EventBus::default(), 0.8, 5));

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(StubTool::succeeding("delete_file", "deleted").destructive()));
    let tools = Arc::new(ToolExecutor::new(registry, Some(Arc::new(StaticGate::deny()))));
    let cancels = Arc::new(CancelMap::new());

    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::tool_call("call-1", "delete_file", json!({"path": "/tmp/x"})),
        ScriptedTurn::final_text("can't do that"),
    ]));

    let (thread_id, _) = threads.resume_or_create(None).await.unwrap();
    let outcome = engine(threads.clone(), tools, cancels)
        .run_turn(&thread_id, "delete /tmp/x", provider, None, policy())
        .await
        .unwrap();

    assert!(!outcome.aborted);
    let events = threads.get_events(&outcome.final_thread_id).await.unwrap();
    assert!(events.iter().any(|e| matches!(&e.data,
        lace_types::event::EventType::ToolResult { is_error, .. } if *is_error)));
}

// ── S6: compaction preserves identity ────────────────────────────────────

#[tokio::test]
async fn s6_compaction_preserves_identity_across_a_turn() {
    // A tiny context window guarantees `needs_compaction` fires on the
    // very first loop iteration.
    let store = lace_store::EventStore::open_in_memory().await.unwrap();
    let threads = Arc::new(ThreadManager::new(store, EventBus::default(), 0.1, 2));
    let tools = Arc::new(ToolExecutor::new(ToolRegistry::new(), None));
    let cancels = Arc::new(CancelMap::new());

    let (thread_id, _) = threads.resume_or_create(None).await.unwrap();
    for i in 0..20 {
        threads
            .add_event(&thread_id, lace_types::event::EventType::UserMessage(format!("filler message {i}")))
            .await
            .unwrap();
    }

    let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::final_text("short reply")]).with_context_window(50));

    let outcome = engine(threads.clone(), tools, cancels)
        .run_turn(&thread_id, "one more thing", provider, None, policy())
        .await
        .unwrap();

    assert!(!outcome.aborted);
    assert_ne!(
        outcome.final_thread_id, thread_id,
        "mid-turn compaction should roll the turn onto a new thread id"
    );

    // The original thread is untouched; the new thread carries the
    // compaction link back to it and the turn's own messages.
    let original = threads.store().load_thread(&thread_id).await.unwrap();
    assert!(original.events.iter().all(|e| !matches!(&e.data, lace_types::event::EventType::AgentMessage(t) if t == "short reply")));

    let compacted = threads.store().load_thread(&outcome.final_thread_id).await.unwrap();
    assert_eq!(compacted.compaction_of_thread_id.as_deref(), Some(thread_id.as_str()));
    assert!(compacted
        .events
        .iter()
        .any(|e| matches!(&e.data, lace_types::event::EventType::AgentMessage(t) if t == "short reply")));
}
