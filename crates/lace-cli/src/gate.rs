//! A stdin-driven [`ApprovalGate`] for the one-shot CLI. Grounded on
//! `sven::cli::is_headless`'s TTY check (`examples/swedishembedded-sven`):
//! a piped or redirected stdin/stdout means there is nobody to prompt, so
//! an approval request is denied rather than left hanging.

use std::io::{IsTerminal, Write};

use serde_json::{Map, Value};

use lace_tools::approval::{ApprovalGate, RiskHint};
use lace_types::session::ApprovalDecision;

pub struct StdinGate;

#[async_trait::async_trait]
impl ApprovalGate for StdinGate {
    async fn request_approval(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
        risk_hint: RiskHint,
    ) -> ApprovalDecision {
        if !std::io::stdin().is_terminal() || !std::io::stdout().is_terminal() {
            tracing::warn!(tool = %tool_name, "approval requested but stdin is not a terminal, denying");
            return ApprovalDecision::Deny;
        }

        let tool_name = tool_name.to_owned();
        let arguments = Value::Object(arguments.clone());

        tokio::task::spawn_blocking(move || prompt(&tool_name, &arguments, risk_hint))
            .await
            .unwrap_or(ApprovalDecision::Deny)
    }
}

fn prompt(tool_name: &str, arguments: &Value, risk_hint: RiskHint) -> ApprovalDecision {
    let hint = match risk_hint {
        RiskHint::Destructive => "destructive",
        RiskHint::ReadOnly => "read-only",
        RiskHint::Unknown => "unknown risk",
    };
    print!("approve {tool_name} ({hint}) with arguments {arguments}? [y/N/always] ");
    std::io::stdout().flush().ok();

    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return ApprovalDecision::Deny;
    }

    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::AllowOnce,
        "always" | "a" => ApprovalDecision::AllowSession,
        _ => ApprovalDecision::Deny,
    }
}
