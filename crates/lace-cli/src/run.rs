//! `lace --prompt "..."` — one-shot execution command (spec §6.4/§6.5).
//! Grounded on `sa_gateway::cli::run::run`, minus the streamed-delta
//! printer: lace's turn engine returns one [`TurnOutcome`] rather than an
//! event receiver, so there's nothing to drain mid-turn here — progress
//! is only observable by subscribing to the bus directly.

use std::sync::Arc;

use lace_engine::ThreadManager;
use lace_types::config::Config;

use crate::bootstrap;

/// Exit codes (spec §6.5).
pub const EXIT_OK: i32 = 0;
pub const EXIT_TURN_ERROR: i32 = 1;
pub const EXIT_INVALID_ARGS: i32 = 2;
pub const EXIT_APPROVAL_DENIED: i32 = 3;
pub const EXIT_ABORTED_BY_SIGNAL: i32 = 130;

pub async fn run(
    config: &Config,
    continue_hint: Option<String>,
    prompt: String,
    model: Option<String>,
    allow_tool: Vec<String>,
    deny_tool: Vec<String>,
    json_output: bool,
) -> anyhow::Result<i32> {
    let (runtime, thread_id) = bootstrap::build(config, continue_hint.as_deref(), &allow_tool, &deny_tool).await?;
    let events_before = runtime.threads.get_events(&thread_id).await?.len() as i64;

    let cancels = runtime.cancels.clone();
    let signal_thread_id = thread_id.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(thread_id = %signal_thread_id, "interrupted, cancelling turn");
            cancels.cancel(&signal_thread_id);
        }
    });

    let outcome = runtime
        .engine
        .run_turn(&thread_id, prompt, runtime.provider.clone(), model, runtime.policy.clone())
        .await;
    ctrl_c.abort();

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(EXIT_TURN_ERROR);
        }
    };

    if outcome.aborted {
        eprintln!("[thread {}] turn aborted", outcome.final_thread_id);
        return Ok(EXIT_ABORTED_BY_SIGNAL);
    }

    let denied = approval_denied_this_turn(&runtime.threads, &thread_id, &outcome.final_thread_id, events_before).await?;

    if json_output {
        let payload = serde_json::json!({
            "turnId": outcome.turn_id,
            "threadId": outcome.final_thread_id,
            "finalText": outcome.final_text,
            "tokensIn": outcome.tokens_in,
            "tokensOut": outcome.tokens_out,
            "retries": outcome.retries,
            "aborted": outcome.aborted,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}", outcome.final_text);
        eprintln!("[thread {}]", outcome.final_thread_id);
    }

    if denied {
        return Ok(EXIT_APPROVAL_DENIED);
    }
    Ok(EXIT_OK)
}

/// Scan the events this turn actually appended for a tool result denied by
/// the approval gate. `events_before` is the event count on `thread_id`
/// before the turn started; when mid-turn compaction rolled the turn onto
/// `final_thread_id`, every event there is this turn's (compaction starts
/// a fresh thread), so the whole thing is scanned instead.
async fn approval_denied_this_turn(
    threads: &Arc<ThreadManager>,
    thread_id: &str,
    final_thread_id: &str,
    events_before: i64,
) -> anyhow::Result<bool> {
    let events = threads.get_events(final_thread_id).await?;
    let new_events = if final_thread_id == thread_id {
        events.into_iter().filter(|e| e.event_id > events_before).collect::<Vec<_>>()
    } else {
        events
    };

    Ok(new_events.iter().any(|e| match &e.data {
        lace_types::event::EventType::ToolResult { is_error, content, .. } => {
            *is_error && content.iter().any(|c| c.as_text().contains("denied by approval policy"))
        }
        _ => false,
    }))
}
