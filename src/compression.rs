//! History compression engine.
//!
//! Triggered by the master loop when the token estimate crosses the
//! configured threshold. Two modes:
//!
//! - **Deterministic hybrid** (default): walks the message list in index
//!   order, replacing tool outputs with metadata-based summary lines and
//!   squeezing prose through a single-shot LLM call (with plain truncation
//!   as the fallback), stopping once the estimate drops below target.
//! - **Agentic**: delegates to a sub-agent armed with four compression
//!   tools and a bounded iteration budget.
//!
//! Both modes enforce the same invariants: indices 0 and 1 and the
//! protected tail (last 5 user/assistant messages) are never mutated;
//! message count only decreases by dropping `display_only_data`; relative
//! order is preserved; estimates are recomputed from scratch afterwards.

use crate::config::Config;
use crate::estimator::TokenEstimator;
use crate::provider::{CancelToken, ChatOptions, ChatProvider, ChatRequest, NullSink};
use crate::tools::compress as compress_tools;
use crate::tracker::ContextTracker;
use crate::types::{Message, MessageRole, ToolResult};
use std::collections::HashSet;

/// Conversational messages at the end of history that are never mutated.
pub const PROTECTED_TAIL: usize = 5;

/// Truncation fallbacks when the LLM squeeze is unavailable or fails.
const USER_TRUNCATE_CHARS: usize = 200;
const ASSISTANT_TRUNCATE_CHARS: usize = 800;

/// Token budgets quoted to the squeeze sub-call.
const USER_TOKEN_BUDGET: usize = 50;
const ASSISTANT_TOKEN_BUDGET: usize = 200;

/// Iteration budget for the agentic sub-agent.
const AGENT_ITERATION_BUDGET: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMode {
    #[default]
    Deterministic,
    Agentic,
}

/// What a compression pass did.
#[derive(Debug, Default)]
pub struct CompressionReport {
    pub transformed: usize,
    pub dropped: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// Indices compression must never touch: 0 and 1 by position, plus the last
/// [`PROTECTED_TAIL`] user/assistant messages found by one reverse scan.
pub fn protected_indices(messages: &[Message]) -> HashSet<usize> {
    let mut protected = HashSet::new();
    protected.insert(0);
    protected.insert(1);

    let mut remaining = PROTECTED_TAIL;
    for (idx, msg) in messages.iter().enumerate().rev() {
        if remaining == 0 {
            break;
        }
        if msg.is_conversational() {
            protected.insert(idx);
            remaining -= 1;
        }
    }
    protected
}

/// Running total over the list, excluding display-only messages.
pub fn total_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .filter(|m| m.role != MessageRole::DisplayOnlyData)
        .map(|m| m.estimated_tokens)
        .sum()
}

/// The tool name behind a tool-role message, recovered from the preceding
/// assistant message whose `tool_calls` carries the matching id.
fn originating_call<'a>(
    messages: &'a [Message],
    idx: usize,
) -> Option<(&'a str, &'a serde_json::Value)> {
    let call_id = messages[idx].tool_call_id.as_deref()?;
    for msg in messages[..idx].iter().rev() {
        if msg.role != MessageRole::Assistant {
            continue;
        }
        if let Some(calls) = &msg.tool_calls {
            if let Some(call) = calls.iter().find(|c| c.id == call_id) {
                return Some((call.name.as_str(), &call.arguments));
            }
        }
    }
    None
}

/// Computes the compact replacement line for a tool-role message, or `None`
/// when `idx` is not a tool message.
pub(crate) fn tool_replacement(
    messages: &[Message],
    idx: usize,
    tracker: &ContextTracker,
) -> Option<String> {
    if messages.get(idx)?.role != MessageRole::Tool {
        return None;
    }

    let Some((name, args)) = originating_call(messages, idx) else {
        return Some("🔧 [Compressed] Tool executed successfully".to_string());
    };

    match name {
        "read_file" | "read_lines" => {
            let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("?");
            let lines = serde_json::from_str::<ToolResult>(&messages[idx].content)
                .ok()
                .and_then(|r| r.data)
                .map(|d| d.lines().count())
                .unwrap_or(0);

            let summary = tracker
                .tracked(std::path::Path::new(path))
                .and_then(|t| t.curated.as_ref())
                .map(|c| c.summary.clone());

            Some(match summary {
                Some(summary) => format!(
                    "📄 [Compressed] Read {} ({} lines) • Curator Summary: {}",
                    path, lines, summary
                ),
                None => format!("📄 [Compressed] Read {} ({} lines)", path, lines),
            })
        }
        "write_file" | "insert_lines" | "replace_lines" => {
            let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("?");
            let record = tracker
                .recent_modifications()
                .find(|m| m.path.to_string_lossy() == path);

            Some(match record {
                Some(record) => {
                    let age_min = crate::now_unix_ms().saturating_sub(record.unix_ms) / 60_000;
                    format!(
                        "✏️ [Compressed] {} {} ({} min ago)",
                        record.kind.as_str(),
                        path,
                        age_min
                    )
                }
                None => format!("✏️ [Compressed] {} {}", name, path),
            })
        }
        _ => Some("🔧 [Compressed] Tool executed successfully".to_string()),
    }
}

pub(crate) fn truncate_fallback(content: &str, max_chars: usize) -> String {
    if content.len() <= max_chars {
        return content.to_string();
    }
    let mut cut = max_chars;
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &content[..cut])
}

/// Single-shot LLM squeeze of a prose message. Returns `None` on any
/// failure so callers fall back to truncation.
async fn squeeze_with_llm(
    provider: &dyn ChatProvider,
    config: &Config,
    role: MessageRole,
    content: &str,
) -> Option<String> {
    let (budget, what) = match role {
        MessageRole::User => (USER_TOKEN_BUDGET, "the user's intent and key terms"),
        _ => (ASSISTANT_TOKEN_BUDGET, "decisions made and code changes described"),
    };

    let messages = [
        Message::system(format!(
            "Compress the following message to at most {} tokens, preserving {}. \
             Reply with the compressed text only.",
            budget, what
        )),
        Message::user(content.to_string()),
    ];
    let options = ChatOptions {
        temperature: 0.2,
        num_ctx: config.num_ctx,
        ..ChatOptions::default()
    };
    let request = ChatRequest {
        model: &config.model,
        messages: &messages,
        tools: &[],
        options: &options,
    };

    let outcome = provider
        .chat_stream(request, &mut NullSink, &CancelToken::new())
        .await
        .ok()?;
    let squeezed = outcome.full_text.trim().to_string();

    // A squeeze that grew the message is useless.
    if squeezed.is_empty() || squeezed.len() >= content.len() {
        return None;
    }
    Some(squeezed)
}

/// Runs one compression pass. Always recomputes every message's estimate
/// before returning.
pub async fn compress(
    messages: &mut Vec<Message>,
    tracker: &ContextTracker,
    provider: Option<&dyn ChatProvider>,
    config: &Config,
    mode: CompressionMode,
) -> CompressionReport {
    let tokens_before = total_tokens(messages);

    let report = match (mode, provider) {
        (CompressionMode::Agentic, Some(provider)) => {
            agentic_pass(messages, tracker, provider, config).await
        }
        _ => deterministic_pass(messages, tracker, provider, config).await,
    };

    CompressionReport {
        tokens_before,
        tokens_after: total_tokens(messages),
        ..report
    }
}

async fn deterministic_pass(
    messages: &mut Vec<Message>,
    tracker: &ContextTracker,
    provider: Option<&dyn ChatProvider>,
    config: &Config,
) -> CompressionReport {
    let mut report = CompressionReport::default();
    let target = TokenEstimator::target_tokens(&config.compression, config.num_ctx);

    // Display-only messages carry no model-visible information; drop them
    // first so the protected set is computed over the surviving list.
    let before = messages.len();
    messages.retain(|m| m.role != MessageRole::DisplayOnlyData);
    report.dropped = before - messages.len();

    let protected = protected_indices(messages);
    let mut running = total_tokens(messages);

    for idx in 0..messages.len() {
        if running <= target {
            break;
        }
        if protected.contains(&idx) {
            continue;
        }

        let old_tokens = messages[idx].estimated_tokens;
        let replacement = match messages[idx].role {
            MessageRole::Tool => tool_replacement(messages, idx, tracker),
            MessageRole::User if messages[idx].content.len() > USER_TRUNCATE_CHARS => {
                let content = messages[idx].content.clone();
                match provider {
                    Some(p) => match squeeze_with_llm(p, config, MessageRole::User, &content).await {
                        Some(squeezed) => Some(squeezed),
                        None => Some(truncate_fallback(&content, USER_TRUNCATE_CHARS)),
                    },
                    None => Some(truncate_fallback(&content, USER_TRUNCATE_CHARS)),
                }
            }
            MessageRole::Assistant if messages[idx].content.len() > ASSISTANT_TRUNCATE_CHARS => {
                let content = messages[idx].content.clone();
                match provider {
                    Some(p) => {
                        match squeeze_with_llm(p, config, MessageRole::Assistant, &content).await {
                            Some(squeezed) => Some(squeezed),
                            None => Some(truncate_fallback(&content, ASSISTANT_TRUNCATE_CHARS)),
                        }
                    }
                    None => Some(truncate_fallback(&content, ASSISTANT_TRUNCATE_CHARS)),
                }
            }
            // System messages are kept; small prose is not worth a pass.
            _ => None,
        };

        if let Some(replacement) = replacement {
            messages[idx].set_content(replacement);
            report.transformed += 1;
            running = running - old_tokens + messages[idx].estimated_tokens;
        }
    }

    report
}

/// Delegates compression to a sub-agent with the four compression tools and
/// a bounded iteration budget.
async fn agentic_pass(
    messages: &mut Vec<Message>,
    tracker: &ContextTracker,
    provider: &dyn ChatProvider,
    config: &Config,
) -> CompressionReport {
    let mut report = CompressionReport::default();
    let target = TokenEstimator::target_tokens(&config.compression, config.num_ctx);
    let schemas = compress_tools::schemas();

    // Display-only messages are dropped in both modes. The sub-agent's
    // tools only rewrite in place, so this happens up front, before the
    // protected set the metadata tool reports is ever computed.
    let before = messages.len();
    messages.retain(|m| m.role != MessageRole::DisplayOnlyData);
    report.dropped = before - messages.len();

    let mut agent_messages = vec![
        Message::system(
            "You compress conversation history. Inspect the list with \
             get_compression_metadata, compress what the metadata marks \
             unprotected, and finish once verify_compression_target reports \
             satisfied.",
        ),
        Message::user(format!(
            "Reduce the conversation to at most {} estimated tokens.",
            target
        )),
    ];
    let options = ChatOptions {
        temperature: 0.2,
        num_ctx: config.num_ctx,
        ..ChatOptions::default()
    };

    for _ in 0..AGENT_ITERATION_BUDGET {
        let request = ChatRequest {
            model: &config.model,
            messages: &agent_messages,
            tools: &schemas,
            options: &options,
        };
        let outcome = match provider
            .chat_stream(request, &mut NullSink, &CancelToken::new())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("compression sub-agent failed ({}), falling back", e);
                let fallback = deterministic_pass(messages, tracker, None, config).await;
                report.transformed += fallback.transformed;
                report.dropped += fallback.dropped;
                return report;
            }
        };

        if outcome.tool_calls.is_empty() {
            break;
        }

        agent_messages.push(Message::assistant_with_tool_calls(
            outcome.full_text,
            outcome.tool_calls.clone(),
        ));

        let mut satisfied = false;
        for call in outcome.tool_calls {
            let result =
                compress_tools::dispatch(&call.name, &call.arguments, messages, tracker, target)
                    .unwrap_or_else(|| {
                        ToolResult::error(
                            crate::types::ErrorKind::NotFound,
                            format!("unknown compression tool '{}'", call.name),
                        )
                    });

            if call.name == "compress_tool_result" || call.name == "compress_conversation_segment"
            {
                if result.success {
                    report.transformed += 1;
                }
            }
            if call.name == "verify_compression_target" {
                satisfied = result
                    .data
                    .as_deref()
                    .map(|d| d.contains("\"satisfied\":true"))
                    .unwrap_or(false);
            }

            agent_messages.push(Message::tool(call.id, result.to_json_string()));
        }

        if satisfied {
            break;
        }
    }

    report
}
