//! Bus-backed interactive approval gate (spec §4.5), the other side of
//! `lace-tools::approval::ApprovalGate`. Grounded on
//! `sa_gateway::runtime::approval::ApprovalStore`: a request is parked in a
//! map keyed by request ID with a `oneshot::Sender` attached, a
//! `BusEvent::ApprovalRequested` is published so a CLI or test harness can
//! observe it, and `request_approval` blocks on the matching
//! `oneshot::Receiver` until [`InteractiveGate::resolve`] is called (or the
//! request times out and is treated as a denial — spec §4.5 "an
//! unanswered approval request denies the call").

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use lace_tools::approval::{ApprovalGate, RiskHint};
use lace_types::session::ApprovalDecision;

use crate::bus::{BusEvent, EventBus};

struct PendingApproval {
    respond: oneshot::Sender<ApprovalDecision>,
}

pub struct InteractiveGate {
    bus: EventBus,
    pending: Mutex<HashMap<String, PendingApproval>>,
    timeout: Duration,
    thread_id: String,
    turn_id: String,
}

impl InteractiveGate {
    pub fn new(bus: EventBus, thread_id: impl Into<String>, turn_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bus,
            pending: Mutex::new(HashMap::new()),
            timeout,
            thread_id: thread_id.into(),
            turn_id: turn_id.into(),
        }
    }

    /// Resolve a pending request by ID. Called by whatever external layer
    /// owns the human decision (CLI prompt, test harness). Returns `false`
    /// if the request is unknown or already resolved.
    pub fn resolve(&self, request_id: &str, decision: ApprovalDecision) -> bool {
        let pending = self.pending.lock().remove(request_id);
        match pending {
            Some(pending) => {
                self.bus.publish(BusEvent::ApprovalResolved {
                    request_id: request_id.to_owned(),
                    decision,
                });
                pending.respond.send(decision).is_ok()
            }
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl ApprovalGate for InteractiveGate {
    async fn request_approval(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
        risk_hint: RiskHint,
    ) -> ApprovalDecision {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .insert(request_id.clone(), PendingApproval { respond: tx });

        self.bus.publish(BusEvent::ApprovalRequested {
            thread_id: self.thread_id.clone(),
            turn_id: self.turn_id.clone(),
            request_id: request_id.clone(),
            tool_name: tool_name.to_owned(),
            arguments: Value::Object(arguments.clone()),
        });

        tracing::debug!(tool = %tool_name, ?risk_hint, %request_id, "approval requested");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) | Err(_) => {
                self.pending.lock().remove(&request_id);
                tracing::warn!(%request_id, "approval request timed out, denying");
                ApprovalDecision::Deny
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolved_request_returns_its_decision() {
        let bus = EventBus::default();
        let gate = std::sync::Arc::new(InteractiveGate::new(
            bus.clone(),
            "t1",
            "turn1",
            Duration::from_secs(5),
        ));
        let mut rx = bus.subscribe();

        let gate_clone = gate.clone();
        let handle = tokio::spawn(async move {
            gate_clone
                .request_approval("exec", &Map::new(), RiskHint::Destructive)
                .await
        });

        let request_id = loop {
            match rx.recv().await.unwrap() {
                BusEvent::ApprovalRequested { request_id, .. } => break request_id,
                _ => continue,
            }
        };

        assert!(gate.resolve(&request_id, ApprovalDecision::AllowOnce));
        let decision = handle.await.unwrap();
        assert_eq!(decision, ApprovalDecision::AllowOnce);
    }

    #[tokio::test]
    async fn unresolved_request_times_out_as_denied() {
        let gate = InteractiveGate::new(EventBus::default(), "t1", "turn1", Duration::from_millis(20));
        let decision = gate
            .request_approval("exec", &Map::new(), RiskHint::Unknown)
            .await;
        assert_eq!(decision, ApprovalDecision::Deny);
    }

    #[tokio::test]
    async fn resolve_unknown_request_returns_false() {
        let gate = InteractiveGate::new(EventBus::default(), "t1", "turn1", Duration::from_secs(5));
        assert!(!gate.resolve("ghost", ApprovalDecision::Deny));
    }
}
