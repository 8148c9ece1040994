//! Core type definitions for codeloop.
//!
//! This module contains the conversation data model shared by every
//! subsystem:
//!
//! - [`Message`]: one entry of the conversation history, with role, flat
//!   text content, and optional tool-call payloads
//! - [`MessageRole`]: who produced the message (including the UI-only
//!   `DisplayOnlyData` role, which is never sent to the model)
//! - [`ToolCall`]: a structured request from the model naming a tool and
//!   supplying JSON arguments
//! - [`ToolResult`]: the structured response returned to the model as a
//!   `tool`-role message, with a machine-readable [`ErrorKind`]
//!
//! # Wire-format separation
//!
//! Provider wire types (OpenAI chunks, Ollama NDJSON records) live in
//! `provider::lmstudio` / `provider::ollama`. The types here are the
//! canonical internal form both providers normalize into.

use serde::{Deserialize, Serialize};

/// Identifies the sender/role of a message in the conversation.
///
/// Serializes to snake_case strings (`"system"`, `"user"`, `"assistant"`,
/// `"tool"`, `"display_only_data"`) to match the chat wire format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// System message establishing behavior and context.
    System,

    /// Input from the human operator.
    User,

    /// Response from the model; may carry tool calls.
    Assistant,

    /// Result of a tool execution, correlated by `tool_call_id`.
    Tool,

    /// Local display-only content (banners, status lines). Excluded from
    /// token accounting and dropped outright by compression.
    DisplayOnlyData,
}

/// A structured request from the model to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique within a turn. Provider-generated, or synthesized as
    /// `call_<n>` when the provider omits it.
    pub id: String,

    /// Name of the registered tool to execute.
    pub name: String,

    /// JSON arguments for the tool.
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One entry of the conversation history.
///
/// Invariants maintained by the master loop:
/// - index 0 is the immutable system prompt, index 1 the hot-context slot;
///   neither is ever compressed or reordered
/// - a `Tool` message always carries a `tool_call_id` matching a preceding
///   assistant `tool_calls` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,

    pub content: String,

    /// Tool calls issued by an assistant message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Correlation id on `Tool` messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Cached token estimate, maintained by the estimator. Not serialized.
    #[serde(skip)]
    pub estimated_tokens: usize,
}

impl Message {
    /// Creates a message with the given role and content, pre-computing the
    /// token estimate.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        let content = content.into();
        let estimated_tokens = crate::estimator::estimate_str(&content);
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            estimated_tokens,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// An assistant message carrying tool calls alongside any partial text.
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(MessageRole::Assistant, content);
        msg.tool_calls = Some(tool_calls);
        msg
    }

    /// A tool-result message bound to the originating call id.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageRole::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    pub fn display_only(content: impl Into<String>) -> Self {
        Self::new(MessageRole::DisplayOnlyData, content)
    }

    /// Replaces the content and refreshes the cached token estimate.
    /// Compression uses this so the running sum stays consistent.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.estimated_tokens = crate::estimator::estimate_str(&self.content);
    }

    /// True for the conversational roles that make up the protected tail.
    pub fn is_conversational(&self) -> bool {
        matches!(self.role, MessageRole::User | MessageRole::Assistant)
    }
}

/// Machine-readable failure taxonomy for tool results.
///
/// Every kind except `None` is recoverable from the model's point of view:
/// the result is reported back as data and the loop continues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[default]
    None,
    NotFound,
    ValidationFailed,
    PermissionDenied,
    IoError,
    ParseError,
    InternalError,
}

/// Execution metadata attached to every tool result.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolResultMetadata {
    /// Wall-clock execution time of the tool body.
    pub execution_ms: u64,

    /// Size of the produced data in bytes.
    pub bytes: usize,

    /// Completion timestamp, unix milliseconds.
    pub unix_ms: u64,
}

/// The structured response a tool executor returns.
///
/// Serialized as JSON when inserted into the conversation as a `tool`-role
/// message, so the model sees success/error uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "ErrorKind::is_none")]
    pub error_kind: ErrorKind,

    #[serde(default)]
    pub metadata: ToolResultMetadata,
}

impl ErrorKind {
    fn is_none(&self) -> bool {
        *self == ErrorKind::None
    }
}

impl ToolResult {
    /// A successful result carrying `data`.
    pub fn ok(data: impl Into<String>) -> Self {
        let data = data.into();
        let bytes = data.len();
        Self {
            success: true,
            data: Some(data),
            error_message: None,
            error_kind: ErrorKind::None,
            metadata: ToolResultMetadata {
                execution_ms: 0,
                bytes,
                unix_ms: crate::now_unix_ms(),
            },
        }
    }

    /// A failed result with the given kind and message.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_message: Some(message.into()),
            error_kind: kind,
            metadata: ToolResultMetadata {
                execution_ms: 0,
                bytes: 0,
                unix_ms: crate::now_unix_ms(),
            },
        }
    }

    /// Stamps the execution duration, returning self for chaining.
    pub fn with_execution_ms(mut self, ms: u64) -> Self {
        self.metadata.execution_ms = ms;
        self
    }

    /// JSON body for the `tool`-role message.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // ToolResult contains only JSON-safe fields; reaching this arm
            // means a serde_json bug, so degrade to a minimal error body.
            r#"{"success":false,"error_kind":"internal_error"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        assert_eq!(
            serde_json::to_string(&MessageRole::DisplayOnlyData).unwrap(),
            "\"display_only_data\""
        );
        assert_eq!(serde_json::to_string(&MessageRole::Tool).unwrap(), "\"tool\"");
    }

    #[test]
    fn test_message_token_estimate_floor() {
        let msg = Message::user("");
        assert_eq!(msg.estimated_tokens, 1);

        let msg = Message::user("x".repeat(400));
        assert_eq!(msg.estimated_tokens, 100);
    }

    #[test]
    fn test_set_content_refreshes_estimate() {
        let mut msg = Message::assistant("x".repeat(800));
        assert_eq!(msg.estimated_tokens, 200);
        msg.set_content("short");
        assert_eq!(msg.estimated_tokens, 1);
    }

    #[test]
    fn test_tool_message_carries_call_id() {
        let msg = Message::tool("call_1", "{}");
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_tool_result_ok_roundtrip() {
        let result = ToolResult::ok("file contents");
        let json = result.to_json_string();
        let parsed: ToolResult = serde_json::from_str(&json).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.data.as_deref(), Some("file contents"));
        assert_eq!(parsed.error_kind, ErrorKind::None);
        assert_eq!(parsed.metadata.bytes, "file contents".len());
    }

    #[test]
    fn test_tool_result_error_kind_serialized() {
        let result = ToolResult::error(ErrorKind::PermissionDenied, "denied by policy");
        let json = result.to_json_string();
        assert!(json.contains("\"permission_denied\""));
        assert!(!json.contains("\"data\""));
    }
}
