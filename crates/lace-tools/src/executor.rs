//! The tool executor (spec §4.4): `executeTool`'s seven-step pipeline —
//! lookup, allowlist, policy, approval, schema validation, timeout, run.

use std::sync::Arc;
use std::time::Duration;

use lace_types::cancel::CancelToken;
use lace_types::session::{ApprovalDecision, SessionPolicy, ToolPolicy};
use lace_types::tool::{ContentBlock, ToolCall, ToolResult};

use crate::approval::{ApprovalGate, RiskHint};
use crate::registry::ToolRegistry;

#[derive(Clone)]
pub struct ToolExecutorConfig {
    pub default_tool_timeout: Duration,
    pub shell_tool_timeout: Duration,
}

impl Default for ToolExecutorConfig {
    fn default() -> Self {
        Self {
            default_tool_timeout: Duration::from_secs(30),
            shell_tool_timeout: Duration::from_secs(60),
        }
    }
}

pub struct ToolExecutor {
    registry: ToolRegistry,
    gate: Option<Arc<dyn ApprovalGate>>,
    config: ToolExecutorConfig,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, gate: Option<Arc<dyn ApprovalGate>>) -> Self {
        Self {
            registry,
            gate,
            config: ToolExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ToolExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run the full `executeTool` pipeline (spec §4.4). `policy` is
    /// mutated in place on an `ALLOW_SESSION` approval (step 4).
    /// `cancel_token` is the owning turn's cancellation signal (spec §4.4
    /// "tool executions share the turn's cancellation signal"); it is
    /// raced against the timeout/run step so an abort lands as soon as the
    /// tool future is dropped, not only once it finishes on its own.
    pub async fn execute(
        &self,
        call: &ToolCall,
        policy: &mut SessionPolicy,
        cancel_token: &CancelToken,
    ) -> ToolResult {
        if cancel_token.is_cancelled() {
            return ToolResult::error(call.id.clone(), "aborted");
        }

        // 1. Lookup.
        let tool = match self.registry.get(&call.name) {
            Ok(t) => t,
            Err(_) => return ToolResult::error(call.id.clone(), "Tool not found"),
        };
        let definition = tool.definition();

        // 2. allowedTools allowlist.
        if !policy.is_tool_allowed(&call.name) {
            return ToolResult::error(
                call.id.clone(),
                format!("tool '{}' is not in allowed_tools for this session", call.name),
            );
        }

        // 3. Per-tool policy tier.
        match policy.policy_for(&call.name) {
            ToolPolicy::Deny => {
                return ToolResult::error(call.id.clone(), "denied by approval policy");
            }
            ToolPolicy::Allow => {}
            ToolPolicy::RequireApproval => {
                // 4. Approval gate.
                let risk_hint = if definition.annotations.is_destructive() {
                    RiskHint::Destructive
                } else if definition.annotations.read_only_hint == Some(true) {
                    RiskHint::ReadOnly
                } else {
                    RiskHint::Unknown
                };

                let gate = match &self.gate {
                    Some(g) => g,
                    None => {
                        return ToolResult::error(
                            call.id.clone(),
                            "approval required but no gate configured",
                        );
                    }
                };

                let decision = gate
                    .request_approval(&call.name, &call.arguments, risk_hint)
                    .await;

                match decision {
                    ApprovalDecision::Deny => {
                        return ToolResult::error(call.id.clone(), "denied by approval policy");
                    }
                    ApprovalDecision::AllowSession => {
                        policy.upgrade_to_allow(&call.name);
                    }
                    ApprovalDecision::AllowOnce => {}
                }
            }
        }

        // 5. Schema validation.
        let arguments_value = serde_json::Value::Object(call.arguments.clone());
        if let Err(message) = validate_arguments(&definition.input_schema, &arguments_value) {
            return ToolResult::error(
                call.id.clone(),
                format!("invalid arguments for tool {}: {message}", call.name),
            );
        }

        // 6/7. Timeout + execution.
        let timeout = if call.name == "exec" {
            self.config.shell_tool_timeout
        } else {
            self.config.default_tool_timeout
        };

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => ToolResult::error(call.id.clone(), "aborted"),
            outcome = tokio::time::timeout(timeout, tool.call(call.arguments.clone())) => {
                match outcome {
                    Ok(Ok(text)) => ToolResult {
                        id: call.id.clone(),
                        content: vec![ContentBlock::text(text)],
                        is_error: false,
                        metadata: None,
                    },
                    Ok(Err(message)) => ToolResult::error(call.id.clone(), message),
                    Err(_elapsed) => {
                        ToolResult::error(call.id.clone(), format!("tool {} timed out", call.name))
                    }
                }
            }
        }
    }
}

/// Validate `arguments` against `schema`, returning a human-readable
/// description of every failed field (spec §4.4 step 5: "structured
/// description of the failed fields").
fn validate_arguments(schema: &serde_json::Value, arguments: &serde_json::Value) -> Result<(), String> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| format!("schema compile error: {e}"))?;

    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| format!("{}: {}", e.instance_path, e))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::StaticGate;
    use crate::tool::Tool;
    use async_trait::async_trait;
    use lace_types::tool::ToolAnnotations;
    use lace_types::tool::ToolDefinition;
    use serde_json::{json, Map, Value};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "echoes its input".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
                annotations: ToolAnnotations::default(),
            }
        }

        async fn call(&self, arguments: Map<String, Value>) -> std::result::Result<String, String> {
            Ok(arguments.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string())
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "slow".into(),
                description: "sleeps well past any sane cancellation delay".into(),
                input_schema: json!({"type": "object"}),
                annotations: ToolAnnotations::default(),
            }
        }

        async fn call(&self, _arguments: Map<String, Value>) -> std::result::Result<String, String> {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            Ok("done".into())
        }
    }

    fn registry_with_echo() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry
    }

    fn registry_with_slow() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        registry
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            arguments: args.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn unknown_tool_returns_error() {
        let executor = ToolExecutor::new(registry_with_echo(), None);
        let mut policy = SessionPolicy::new(100_000);
        let result = executor.execute(&call("missing", json!({})), &mut policy, &CancelToken::new()).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn allowed_tools_set_blocks_admission() {
        let executor = ToolExecutor::new(registry_with_echo(), None);
        let mut policy = SessionPolicy::new(100_000);
        policy.allowed_tools = Some(["other".to_string()].into_iter().collect());
        let result = executor
            .execute(&call("echo", json!({"text": "hi"})), &mut policy, &CancelToken::new())
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn deny_policy_short_circuits_before_schema_check() {
        let executor = ToolExecutor::new(registry_with_echo(), None);
        let mut policy = SessionPolicy::new(100_000);
        policy.tool_policy.insert("echo".into(), ToolPolicy::Deny);
        let result = executor.execute(&call("echo", json!({})), &mut policy, &CancelToken::new()).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn missing_gate_fails_closed_on_require_approval() {
        let executor = ToolExecutor::new(registry_with_echo(), None);
        let mut policy = SessionPolicy::new(100_000);
        policy.tool_policy.insert("echo".into(), ToolPolicy::RequireApproval);
        let result = executor
            .execute(&call("echo", json!({"text": "hi"})), &mut policy, &CancelToken::new())
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn allow_session_upgrades_policy_for_later_calls() {
        let gate = Arc::new(StaticGate::new(ApprovalDecision::AllowSession));
        let executor = ToolExecutor::new(registry_with_echo(), Some(gate));
        let mut policy = SessionPolicy::new(100_000);
        policy.tool_policy.insert("echo".into(), ToolPolicy::RequireApproval);

        let result = executor
            .execute(&call("echo", json!({"text": "hi"})), &mut policy, &CancelToken::new())
            .await;
        assert!(!result.is_error);
        assert_eq!(policy.policy_for("echo"), ToolPolicy::Allow);
    }

    #[tokio::test]
    async fn invalid_arguments_fail_schema_validation() {
        let executor = ToolExecutor::new(registry_with_echo(), None);
        let mut policy = SessionPolicy::new(100_000);
        let result = executor.execute(&call("echo", json!({})), &mut policy, &CancelToken::new()).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn successful_call_returns_text_content() {
        let executor = ToolExecutor::new(registry_with_echo(), None);
        let mut policy = SessionPolicy::new(100_000);
        let result = executor
            .execute(&call("echo", json!({"text": "hello"})), &mut policy, &CancelToken::new())
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content[0].as_text(), "hello");
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_the_tool_runs() {
        let executor = ToolExecutor::new(registry_with_echo(), None);
        let mut policy = SessionPolicy::new(100_000);
        let cancel_token = CancelToken::new();
        cancel_token.cancel();
        let result = executor
            .execute(&call("echo", json!({"text": "hi"})), &mut policy, &cancel_token)
            .await;
        assert!(result.is_error);
        assert_eq!(result.content[0].as_text(), "aborted");
    }

    #[tokio::test]
    async fn cancel_mid_flight_wins_the_race_against_a_slow_tool() {
        let executor = ToolExecutor::new(registry_with_slow(), None);
        let mut policy = SessionPolicy::new(100_000);
        let cancel_token = CancelToken::new();
        let canceller = cancel_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result = executor
            .execute(&call("slow", json!({})), &mut policy, &cancel_token)
            .await;

        assert!(started.elapsed() < std::time::Duration::from_millis(500));
        assert!(result.is_error);
        assert_eq!(result.content[0].as_text(), "aborted");
    }
}
