//! Compression sub-agent tools.
//!
//! These four tools are offered exclusively to the compression sub-agent;
//! they live outside the baseline registry and operate directly on the
//! master loop's message list. The sub-agent plans with
//! `get_compression_metadata`, applies `compress_tool_result` /
//! `compress_conversation_segment`, and finishes when
//! `verify_compression_target` reports satisfied.
//!
//! The protected set is recomputed on every call, so the sub-agent can
//! never be talked into touching the tail.

use crate::compression::{protected_indices, tool_replacement, total_tokens, truncate_fallback};
use crate::tracker::ContextTracker;
use crate::types::{ErrorKind, Message, MessageRole, ToolResult};
use serde_json::{Value, json};

const PREVIEW_CHARS: usize = 60;

const SEGMENT_USER_CHARS: usize = 200;
const SEGMENT_ASSISTANT_CHARS: usize = 800;

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
        MessageRole::DisplayOnlyData => "display_only_data",
    }
}

/// Schemas for the sub-agent's `tools` array.
pub fn schemas() -> Vec<Value> {
    let entry = |name: &str, description: &str, parameters: Value| {
        json!({
            "type": "function",
            "function": {"name": name, "description": description, "parameters": parameters}
        })
    };

    vec![
        entry(
            "get_compression_metadata",
            "Describe every message: index, role, estimated tokens, protection, preview.",
            json!({"type": "object", "properties": {}, "required": []}),
        ),
        entry(
            "compress_tool_result",
            "Replace one tool-role message with a compact summary line.",
            json!({
                "type": "object",
                "properties": {"index": {"type": "integer"}},
                "required": ["index"]
            }),
        ),
        entry(
            "compress_conversation_segment",
            "Truncate unprotected user/assistant messages in an inclusive index range.",
            json!({
                "type": "object",
                "properties": {
                    "start_index": {"type": "integer"},
                    "end_index": {"type": "integer"}
                },
                "required": ["start_index", "end_index"]
            }),
        ),
        entry(
            "verify_compression_target",
            "Check whether the conversation is below the token target.",
            json!({"type": "object", "properties": {}, "required": []}),
        ),
    ]
}

/// Dispatches one sub-agent call. Returns `None` for unknown tool names.
pub fn dispatch(
    name: &str,
    args: &Value,
    messages: &mut Vec<Message>,
    tracker: &ContextTracker,
    target_tokens: usize,
) -> Option<ToolResult> {
    match name {
        "get_compression_metadata" => Some(metadata(messages, target_tokens)),
        "compress_tool_result" => Some(compress_tool_result(args, messages, tracker)),
        "compress_conversation_segment" => Some(compress_segment(args, messages)),
        "verify_compression_target" => Some(verify(messages, target_tokens)),
        _ => None,
    }
}

fn metadata(messages: &[Message], target_tokens: usize) -> ToolResult {
    let protected = protected_indices(messages);
    let entries: Vec<Value> = messages
        .iter()
        .enumerate()
        .map(|(idx, msg)| {
            let mut preview = msg.content.clone();
            if preview.len() > PREVIEW_CHARS {
                let mut cut = PREVIEW_CHARS;
                while cut > 0 && !preview.is_char_boundary(cut) {
                    cut -= 1;
                }
                preview.truncate(cut);
            }
            json!({
                "index": idx,
                "role": role_str(msg.role),
                "estimated_tokens": msg.estimated_tokens,
                "protected": protected.contains(&idx),
                "preview": preview,
            })
        })
        .collect();

    let body = json!({
        "messages": entries,
        "total_tokens": total_tokens(messages),
        "target_tokens": target_tokens,
    });
    ToolResult::ok(body.to_string())
}

fn compress_tool_result(
    args: &Value,
    messages: &mut Vec<Message>,
    tracker: &ContextTracker,
) -> ToolResult {
    let Some(index) = args.get("index").and_then(Value::as_u64).map(|v| v as usize) else {
        return ToolResult::error(ErrorKind::ValidationFailed, "index must be an integer");
    };
    if index >= messages.len() {
        return ToolResult::error(
            ErrorKind::ValidationFailed,
            format!("index {} out of range ({} messages)", index, messages.len()),
        );
    }
    if protected_indices(messages).contains(&index) {
        return ToolResult::error(
            ErrorKind::ValidationFailed,
            format!("message {} is protected", index),
        );
    }
    if messages[index].role != MessageRole::Tool {
        return ToolResult::error(
            ErrorKind::ValidationFailed,
            format!("message {} is not a tool result", index),
        );
    }

    let before = messages[index].estimated_tokens;
    let Some(replacement) = tool_replacement(messages, index, tracker) else {
        return ToolResult::error(ErrorKind::InternalError, "replacement unavailable");
    };
    messages[index].set_content(replacement);

    ToolResult::ok(
        json!({
            "index": index,
            "tokens_before": before,
            "tokens_after": messages[index].estimated_tokens,
        })
        .to_string(),
    )
}

fn compress_segment(args: &Value, messages: &mut Vec<Message>) -> ToolResult {
    let start = args.get("start_index").and_then(Value::as_u64).map(|v| v as usize);
    let end = args.get("end_index").and_then(Value::as_u64).map(|v| v as usize);
    let (Some(start), Some(end)) = (start, end) else {
        return ToolResult::error(
            ErrorKind::ValidationFailed,
            "start_index and end_index must be integers",
        );
    };
    if start > end || start >= messages.len() {
        return ToolResult::error(
            ErrorKind::ValidationFailed,
            format!("invalid segment {}-{}", start, end),
        );
    }
    let end = end.min(messages.len() - 1);

    let protected = protected_indices(messages);
    let mut compressed = 0usize;
    for idx in start..=end {
        if protected.contains(&idx) {
            continue;
        }
        let (limit, eligible) = match messages[idx].role {
            MessageRole::User => (SEGMENT_USER_CHARS, true),
            MessageRole::Assistant => (SEGMENT_ASSISTANT_CHARS, true),
            _ => (0, false),
        };
        if eligible && messages[idx].content.len() > limit {
            let truncated = truncate_fallback(&messages[idx].content, limit);
            messages[idx].set_content(truncated);
            compressed += 1;
        }
    }

    ToolResult::ok(json!({"compressed": compressed}).to_string())
}

fn verify(messages: &[Message], target_tokens: usize) -> ToolResult {
    let total = total_tokens(messages);
    ToolResult::ok(
        json!({
            "satisfied": total <= target_tokens,
            "total_tokens": total,
            "target_tokens": target_tokens,
        })
        .to_string(),
    )
}
