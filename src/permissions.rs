//! Permission engine: per-tool policy evaluation and durable policies.
//!
//! For each incoming tool call the engine produces a [`Decision`] from the
//! tool's declared risk level, any stored durable policy, and in-memory
//! session grants. `Safe` tools bypass prompting entirely; `Medium` and
//! `High` need a policy or a user prompt.
//!
//! The policy file (`policies.json`, sibling of the config file) is loaded
//! tolerantly (missing or corrupt resolves to "no policies") and written
//! best-effort: a failed write logs and continues.

use crate::types::{ErrorKind, ToolResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Risk level a tool declares at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Read-only or local-state-only; never prompts.
    Safe,
    /// Reads workspace files; prompts without a grant.
    Medium,
    /// Mutates workspace files; prompts with a warning.
    High,
}

/// Outcome of policy evaluation for one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    AskUser,
}

/// The user's answer to a permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptResponse {
    /// This call only.
    AllowOnce,
    /// Grant for the rest of the session, keyed by tool + argument shape.
    AllowSession,
    /// Persist a durable always-allow policy.
    Remember,
    /// Refuse; the model sees a permission_denied tool result.
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    AlwaysAllow,
    AlwaysDeny,
}

/// One durable policy record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub tool_name: String,
    pub decision: PolicyDecision,
    pub created_unix_ms: u64,
    /// Optional argument substring pattern; a record with a pattern only
    /// matches calls whose fingerprint contains it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PolicyFile {
    policies: Vec<PolicyRecord>,
}

/// Durable policy storage backed by `policies.json`.
#[derive(Debug)]
pub struct PolicyStore {
    path: PathBuf,
    policies: Vec<PolicyRecord>,
}

impl PolicyStore {
    /// Loads policies from `path`. Missing or corrupt file → empty store.
    pub fn load(path: &Path) -> Self {
        let policies = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<PolicyFile>(&raw) {
                Ok(file) => file.policies,
                Err(e) => {
                    log::warn!("corrupt policy file {}: {} (treating as empty)", path.display(), e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            path: path.to_path_buf(),
            policies,
        }
    }

    /// In-memory store for tests and ephemeral sessions.
    pub fn ephemeral() -> Self {
        Self {
            path: PathBuf::new(),
            policies: Vec::new(),
        }
    }

    pub fn records(&self) -> &[PolicyRecord] {
        &self.policies
    }

    /// First policy matching the tool name and argument fingerprint.
    fn matching(&self, tool_name: &str, fingerprint: &str) -> Option<&PolicyRecord> {
        self.policies.iter().find(|p| {
            p.tool_name == tool_name
                && p.pattern
                    .as_deref()
                    .map(|pat| fingerprint.contains(pat))
                    .unwrap_or(true)
        })
    }

    /// Appends a record and writes the file. Write failures log and continue.
    pub fn remember(&mut self, record: PolicyRecord) {
        self.policies.push(record);
        if self.path.as_os_str().is_empty() {
            return;
        }
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = PolicyFile {
            policies: self.policies.clone(),
        };
        match serde_json::to_string_pretty(&file) {
            Ok(body) => {
                if let Err(e) = std::fs::write(&self.path, body) {
                    log::warn!("failed to persist policies to {}: {}", self.path.display(), e);
                }
            }
            Err(e) => log::warn!("failed to serialize policies: {}", e),
        }
    }
}

/// Stable fingerprint of a call's arguments for session-grant keying.
/// Keys are sorted, so equal argument sets produce equal fingerprints
/// regardless of arrival order.
pub fn args_fingerprint(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.iter().collect();
            keys.sort_by_key(|(k, _)| k.as_str());
            keys.iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&")
        }
        other => other.to_string(),
    }
}

/// Evaluates tool calls against risk levels, durable policies, and session
/// grants.
pub struct PermissionEngine {
    store: PolicyStore,
    session_grants: HashSet<(String, String)>,
}

impl PermissionEngine {
    pub fn new(store: PolicyStore) -> Self {
        Self {
            store,
            session_grants: HashSet::new(),
        }
    }

    /// Decision for one tool call.
    pub fn evaluate(&self, tool_name: &str, risk: RiskLevel, arguments: &serde_json::Value) -> Decision {
        if risk == RiskLevel::Safe {
            return Decision::Allow;
        }

        let fingerprint = args_fingerprint(arguments);

        if let Some(policy) = self.store.matching(tool_name, &fingerprint) {
            return match policy.decision {
                PolicyDecision::AlwaysAllow => Decision::Allow,
                PolicyDecision::AlwaysDeny => Decision::Deny,
            };
        }

        if self
            .session_grants
            .contains(&(tool_name.to_string(), fingerprint))
        {
            return Decision::Allow;
        }

        Decision::AskUser
    }

    /// Applies the user's prompt answer; returns whether the call may run.
    pub fn record_response(
        &mut self,
        tool_name: &str,
        arguments: &serde_json::Value,
        response: PromptResponse,
    ) -> bool {
        match response {
            PromptResponse::AllowOnce => true,
            PromptResponse::AllowSession => {
                self.session_grants
                    .insert((tool_name.to_string(), args_fingerprint(arguments)));
                true
            }
            PromptResponse::Remember => {
                self.store.remember(PolicyRecord {
                    tool_name: tool_name.to_string(),
                    decision: PolicyDecision::AlwaysAllow,
                    created_unix_ms: crate::now_unix_ms(),
                    pattern: None,
                });
                true
            }
            PromptResponse::Deny => false,
        }
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }
}

/// The uniform result returned to the model when a call is refused.
pub fn denied_result(tool_name: &str) -> ToolResult {
    ToolResult::error(
        ErrorKind::PermissionDenied,
        format!("Permission denied for tool '{}'", tool_name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_safe_tools_bypass_prompting() {
        let engine = PermissionEngine::new(PolicyStore::ephemeral());
        assert_eq!(
            engine.evaluate("get_current_time", RiskLevel::Safe, &json!({})),
            Decision::Allow
        );
    }

    #[test]
    fn test_medium_without_grant_asks() {
        let engine = PermissionEngine::new(PolicyStore::ephemeral());
        assert_eq!(
            engine.evaluate("read_file", RiskLevel::Medium, &json!({"path": "a.rs"})),
            Decision::AskUser
        );
    }

    #[test]
    fn test_session_grant_keyed_by_args() {
        let mut engine = PermissionEngine::new(PolicyStore::ephemeral());
        let args = json!({"path": "a.rs"});
        engine.record_response("read_file", &args, PromptResponse::AllowSession);

        assert_eq!(
            engine.evaluate("read_file", RiskLevel::Medium, &args),
            Decision::Allow
        );
        // Different argument fingerprint still asks.
        assert_eq!(
            engine.evaluate("read_file", RiskLevel::Medium, &json!({"path": "b.rs"})),
            Decision::AskUser
        );
    }

    #[test]
    fn test_remember_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.json");

        let mut engine = PermissionEngine::new(PolicyStore::load(&path));
        engine.record_response("write_file", &json!({"path": "x"}), PromptResponse::Remember);

        // A fresh engine over the same file allows without prompting.
        let engine2 = PermissionEngine::new(PolicyStore::load(&path));
        assert_eq!(
            engine2.evaluate("write_file", RiskLevel::High, &json!({"path": "y"})),
            Decision::Allow
        );
    }

    #[test]
    fn test_always_deny_policy() {
        let mut store = PolicyStore::ephemeral();
        store.remember(PolicyRecord {
            tool_name: "read_file".to_string(),
            decision: PolicyDecision::AlwaysDeny,
            created_unix_ms: 0,
            pattern: None,
        });
        let engine = PermissionEngine::new(store);
        assert_eq!(
            engine.evaluate("read_file", RiskLevel::Medium, &json!({"path": "README.md"})),
            Decision::Deny
        );
    }

    #[test]
    fn test_pattern_scoped_policy() {
        let mut store = PolicyStore::ephemeral();
        store.remember(PolicyRecord {
            tool_name: "write_file".to_string(),
            decision: PolicyDecision::AlwaysAllow,
            created_unix_ms: 0,
            pattern: Some("path=\"/tmp/".to_string()),
        });
        let engine = PermissionEngine::new(store);

        assert_eq!(
            engine.evaluate("write_file", RiskLevel::High, &json!({"path": "/tmp/scratch.txt"})),
            Decision::Allow
        );
        assert_eq!(
            engine.evaluate("write_file", RiskLevel::High, &json!({"path": "/etc/passwd"})),
            Decision::AskUser
        );
    }

    #[test]
    fn test_corrupt_policy_file_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.json");
        std::fs::write(&path, "{{{{").unwrap();

        let store = PolicyStore::load(&path);
        assert!(store.records().is_empty());
    }

    #[test]
    fn test_args_fingerprint_order_independent() {
        let a = json!({"b": 2, "a": 1});
        let b = json!({"a": 1, "b": 2});
        assert_eq!(args_fingerprint(&a), args_fingerprint(&b));
    }

    #[test]
    fn test_denied_result_shape() {
        let result = denied_result("read_file");
        assert!(!result.success);
        assert_eq!(result.error_kind, ErrorKind::PermissionDenied);
    }
}
