//! The approval gate (spec §4.5): a single `requestApproval` operation
//! behind a trait, so the executor doesn't care whether a human or a
//! policy engine answers it.

use serde_json::{Map, Value};

use lace_types::session::ApprovalDecision;

/// A coarse signal the executor derives from a tool's annotations before
/// asking the gate, so presentation layers can style the prompt (spec §4.5
/// `riskHint`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskHint {
    ReadOnly,
    Destructive,
    Unknown,
}

#[async_trait::async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn request_approval(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
        risk_hint: RiskHint,
    ) -> ApprovalDecision;
}

/// Resolves every request against a fixed, pre-decided outcome. Spec §4.5
/// describes this as the "non-interactive" gate — policy computed
/// statically rather than by prompting a user — though here the policy is
/// a single constant rather than a lookup table (the per-tool table
/// already lives one layer up, in `SessionPolicy`).
pub struct StaticGate {
    decision: ApprovalDecision,
}

impl StaticGate {
    pub fn new(decision: ApprovalDecision) -> Self {
        Self { decision }
    }

    pub fn allow_once() -> Self {
        Self::new(ApprovalDecision::AllowOnce)
    }

    pub fn deny() -> Self {
        Self::new(ApprovalDecision::Deny)
    }
}

#[async_trait::async_trait]
impl ApprovalGate for StaticGate {
    async fn request_approval(
        &self,
        tool_name: &str,
        _arguments: &Map<String, Value>,
        risk_hint: RiskHint,
    ) -> ApprovalDecision {
        tracing::debug!(tool = %tool_name, ?risk_hint, decision = ?self.decision, "static approval gate resolved");
        self.decision
    }
}
