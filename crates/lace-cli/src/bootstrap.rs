//! Wires a [`Config`] into a running [`TurnEngine`] plus everything it
//! needs: the event store, thread manager, tool registry (built-ins plus
//! `delegate`), provider, and session policy. Grounded on
//! `sa_gateway::bootstrap::build_app_state`, minus the HTTP server and
//! background workers this crate has no use for.

use std::collections::HashMap;
use std::sync::Arc;

use lace_engine::{CancelMap, DelegateTool, DelegationCoordinator, EventBus, ThreadManager, TurnEngine, TurnEngineConfig};
use lace_providers::LlmProvider;
use lace_store::EventStore;
use lace_testing::{ScriptedProvider, ScriptedTurn};
use lace_tools::builtin::{ExecTool, FileReadTool};
use lace_tools::{ToolExecutor, ToolExecutorConfig, ToolRegistry};
use lace_types::config::Config;
use lace_types::session::{SessionPolicy, ToolPolicy};

use crate::gate::StdinGate;

pub struct Runtime {
    pub threads: Arc<ThreadManager>,
    pub engine: TurnEngine,
    pub provider: Arc<dyn LlmProvider>,
    pub policy: Arc<tokio::sync::Mutex<SessionPolicy>>,
    pub cancels: Arc<CancelMap>,
}

/// `LACE_DB_PATH` overrides `Config.store_path` (spec §6.4).
fn resolve_db_path(config: &Config) -> std::path::PathBuf {
    std::env::var("LACE_DB_PATH")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| config.store_path.clone())
}

/// `LACE_TEST_MODE=true` swaps the configured provider for an in-memory
/// scripted one, so the CLI can be exercised end to end without a real
/// model endpoint (spec §6.4).
fn is_test_mode() -> bool {
    std::env::var("LACE_TEST_MODE").as_deref() == Ok("true")
}

async fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn LlmProvider>> {
    if is_test_mode() {
        tracing::info!("LACE_TEST_MODE=true, using the in-memory scripted provider");
        return Ok(Arc::new(ScriptedProvider::new(vec![ScriptedTurn::final_text(
            "(test mode) acknowledged",
        )])));
    }

    let registry = lace_providers::ProviderRegistry::from_config(config)?;
    for init_error in registry.init_errors() {
        tracing::warn!(provider = %init_error.provider_name, error = %init_error.error, "provider failed to initialize");
    }
    Ok(registry.default())
}

fn seed_tool_policy(config: &Config) -> HashMap<String, ToolPolicy> {
    let mut seeded = HashMap::new();
    for (tool, tier) in &config.session_policy_seed {
        let policy = match tier.as_str() {
            "allow" => ToolPolicy::Allow,
            "require-approval" => ToolPolicy::RequireApproval,
            "deny" => ToolPolicy::Deny,
            other => {
                tracing::warn!(tool, tier = other, "unrecognized session_policy_seed tier, ignoring");
                continue;
            }
        };
        seeded.insert(tool.clone(), policy);
    }
    seeded
}

fn build_tool_registry(workdir: &std::path::Path, config: &Config) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let mut exec = ExecTool::new(workdir);
    exec.timeout = std::time::Duration::from_secs(config.shell_tool_timeout_secs);
    registry.register(Arc::new(exec));
    registry.register(Arc::new(FileReadTool::new(workdir)));
    registry
}

fn tool_executor_config(config: &Config) -> ToolExecutorConfig {
    ToolExecutorConfig {
        default_tool_timeout: std::time::Duration::from_secs(config.default_tool_timeout_secs),
        shell_tool_timeout: std::time::Duration::from_secs(config.shell_tool_timeout_secs),
    }
}

/// Resolve the thread to run against: `--continue` with a value resumes
/// that thread, `--continue` with no value resumes the most recently
/// updated one, and no flag at all starts a fresh thread (spec §6.4
/// `resumeOrCreate(threadId ?? latest)`).
async fn resolve_thread(threads: &ThreadManager, continue_hint: Option<&str>) -> anyhow::Result<String> {
    let hint = match continue_hint {
        None => None,
        Some("") => threads.get_latest_thread_id().await?,
        Some(id) => Some(id.to_owned()),
    };
    let (thread_id, _resumed) = threads.resume_or_create(hint.as_deref()).await?;
    Ok(thread_id)
}

/// Assemble a [`Runtime`] ready to drive turns, and resolve which thread it
/// should run against. One store is opened for the whole invocation; the
/// `delegate` tool's `parent_thread_id` is bound to the resolved thread
/// before the registry is built, since it can't be rebound afterward.
pub async fn build(
    config: &Config,
    continue_hint: Option<&str>,
    allow_tools: &[String],
    deny_tools: &[String],
) -> anyhow::Result<(Runtime, String)> {
    let db_path = resolve_db_path(config);
    let store = if is_test_mode() && std::env::var("LACE_DB_PATH").is_err() {
        EventStore::open_in_memory().await?
    } else {
        EventStore::open(&db_path).await?
    };

    let bus = EventBus::default();
    let threads = Arc::new(ThreadManager::new(
        store,
        bus.clone(),
        config.token_budget_fraction,
        config.compaction_tail_turns as usize,
    ));
    let thread_id = resolve_thread(&threads, continue_hint).await?;
    let cancels = Arc::new(CancelMap::new());

    let workdir = std::env::current_dir()?;
    let gate: Arc<dyn lace_tools::ApprovalGate> = Arc::new(StdinGate);

    let exec_config = tool_executor_config(config);
    let mut parent_registry = build_tool_registry(&workdir, config);
    let base_registry = build_tool_registry(&workdir, config);

    let provider = build_provider(config).await?;

    let mut tool_policy = seed_tool_policy(config);
    for name in allow_tools {
        tool_policy.insert(name.clone(), ToolPolicy::Allow);
    }
    for name in deny_tools {
        tool_policy.insert(name.clone(), ToolPolicy::Deny);
    }

    let context_window = provider.capabilities().default_context_window;
    let token_budget = (context_window as f64 * config.token_budget_fraction) as u32;
    let policy = Arc::new(tokio::sync::Mutex::new(SessionPolicy {
        tool_policy,
        allowed_tools: None,
        token_budget,
    }));

    let coordinator = Arc::new(DelegationCoordinator::new(threads.clone(), cancels.clone(), config.delegation_depth_limit));
    let delegate_tool = DelegateTool::new(
        coordinator,
        base_registry,
        Some(gate.clone()),
        exec_config.clone(),
        provider.clone(),
        None,
        policy.clone(),
        thread_id.clone(),
        0,
    );

    parent_registry.register(Arc::new(delegate_tool));
    let tools = Arc::new(ToolExecutor::new(parent_registry, Some(gate)).with_config(exec_config));

    let engine = TurnEngine::new(threads.clone(), tools, cancels.clone(), bus, TurnEngineConfig::default());

    Ok((Runtime { threads, engine, provider, policy, cancels }, thread_id))
}
