//! Session policy surface (spec §3.2, §4.4, §4.5).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Per-tool policy tier (spec §3.2, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolPolicy {
    Allow,
    RequireApproval,
    Deny,
}

/// The policy surface a session exposes to the tool executor (spec §3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPolicy {
    pub tool_policy: HashMap<String, ToolPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<HashSet<String>>,
    /// Soft ceiling on tokens for a single turn; consulted by C10.
    pub token_budget: u32,
}

impl SessionPolicy {
    pub fn new(token_budget: u32) -> Self {
        SessionPolicy {
            tool_policy: HashMap::new(),
            allowed_tools: None,
            token_budget,
        }
    }

    /// Policy for `tool_name`, defaulting to `RequireApproval` for tools
    /// with no explicit entry (fail-closed).
    pub fn policy_for(&self, tool_name: &str) -> ToolPolicy {
        self.tool_policy
            .get(tool_name)
            .copied()
            .unwrap_or(ToolPolicy::RequireApproval)
    }

    /// Step 2 of `executeTool` (spec §4.4): an `allowedTools` allowlist, if
    /// configured, filters admission before the policy tier is consulted.
    pub fn is_tool_allowed(&self, tool_name: &str) -> bool {
        match &self.allowed_tools {
            Some(set) => set.contains(tool_name),
            None => true,
        }
    }

    /// `ALLOW_SESSION` upgrade (spec §4.4 step 4): the policy for this tool
    /// becomes `Allow` for the remainder of the session.
    pub fn upgrade_to_allow(&mut self, tool_name: &str) {
        self.tool_policy
            .insert(tool_name.to_string(), ToolPolicy::Allow);
    }
}

/// Resolution returned by the approval gate (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalDecision {
    AllowOnce,
    AllowSession,
    Deny,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlisted_tool_defaults_to_require_approval() {
        let policy = SessionPolicy::new(100_000);
        assert_eq!(policy.policy_for("bash"), ToolPolicy::RequireApproval);
    }

    #[test]
    fn allow_session_upgrades_policy() {
        let mut policy = SessionPolicy::new(100_000);
        policy
            .tool_policy
            .insert("bash".into(), ToolPolicy::RequireApproval);
        policy.upgrade_to_allow("bash");
        assert_eq!(policy.policy_for("bash"), ToolPolicy::Allow);
    }

    #[test]
    fn allowed_tools_set_restricts_admission() {
        let mut policy = SessionPolicy::new(100_000);
        policy.allowed_tools = Some(HashSet::from(["file_read".to_string()]));
        assert!(policy.is_tool_allowed("file_read"));
        assert!(!policy.is_tool_allowed("bash"));
    }
}
