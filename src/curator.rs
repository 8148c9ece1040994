//! File-curator sub-agent.
//!
//! A single-shot LLM call that filters a large file down to the line ranges
//! relevant to the current conversation. The contract with the parent
//! `read_file` call is "degrade to something useful, never fail": malformed
//! output is retried up to twice, then the caller falls back to the full
//! file.

use crate::config::Config;
use crate::provider::{CancelToken, ChatOptions, ChatProvider, ChatRequest, NullSink};
use crate::tracker::{CurationCache, CuratedRange};
use crate::types::{Message, MessageRole};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Attempts before giving up and letting the caller return the full file.
const MAX_ATTEMPTS: u32 = 3;

/// Minimum lines a kept range must span.
const MIN_RANGE_LINES: usize = 3;

/// How many trailing conversational messages feed the context excerpt.
const EXCERPT_MESSAGES: usize = 3;
const EXCERPT_CHARS: usize = 240;

/// Validated curator output.
#[derive(Debug)]
pub struct Curation {
    pub line_ranges: Vec<CuratedRange>,
    pub summary: String,
}

/// Raw JSON the sub-agent must produce.
#[derive(Debug, Deserialize)]
struct CuratorPayload {
    line_ranges: Vec<PayloadRange>,
    summary: String,
    #[serde(default)]
    #[allow(dead_code)]
    preserved_percentage: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct PayloadRange {
    start: usize,
    end: usize,
    #[serde(default)]
    reason: String,
}

/// Runs the curator against `content`, retrying on malformed output.
pub async fn run(
    provider: &dyn ChatProvider,
    config: &Config,
    path: &Path,
    content: &str,
    total_lines: usize,
    conversation: &[Message],
) -> Result<Curation> {
    let numbered = crate::tools::fs::number_lines(content, 1);
    let excerpt = conversation_excerpt(conversation);
    let prompt = build_prompt(path, total_lines, &numbered, &excerpt);

    let options = ChatOptions {
        temperature: 0.2,
        num_ctx: config.num_ctx,
        format_json: true,
        ..ChatOptions::default()
    };

    let messages = [
        Message::system(
            "You extract the relevant parts of source files. \
             Respond with strict JSON only: \
             {\"line_ranges\":[{\"start\":N,\"end\":N,\"reason\":\"...\"}],\
             \"summary\":\"...\",\"preserved_percentage\":N}",
        ),
        Message::user(prompt),
    ];

    let mut last_err = Error::other("curator produced no output");
    for attempt in 1..=MAX_ATTEMPTS {
        let request = ChatRequest {
            model: &config.model,
            messages: &messages,
            tools: &[],
            options: &options,
        };
        let outcome = provider
            .chat_stream(request, &mut NullSink, &CancelToken::new())
            .await?;

        match parse_payload(&outcome.full_text, total_lines) {
            Ok(curation) => return Ok(curation),
            Err(e) => {
                log::debug!(
                    target: "context",
                    "curator attempt {}/{} rejected: {}",
                    attempt,
                    MAX_ATTEMPTS,
                    e
                );
                last_err = e;
            }
        }
    }

    Err(last_err)
}

fn build_prompt(path: &Path, total_lines: usize, numbered: &str, excerpt: &str) -> String {
    let mut prompt = format!(
        "File: {} ({} lines, numbered below).\n",
        path.display(),
        total_lines
    );
    if !excerpt.is_empty() {
        prompt.push_str("Conversation context:\n");
        prompt.push_str(excerpt);
        prompt.push('\n');
    }
    prompt.push_str(
        "Select the line ranges most relevant to the conversation and summarize the file.\n\n",
    );
    prompt.push_str(numbered);
    prompt
}

fn conversation_excerpt(conversation: &[Message]) -> String {
    conversation
        .iter()
        .rev()
        .filter(|m| matches!(m.role, MessageRole::User | MessageRole::Assistant))
        .take(EXCERPT_MESSAGES)
        .map(|m| {
            let mut line = m.content.clone();
            if line.len() > EXCERPT_CHARS {
                line.truncate(EXCERPT_CHARS);
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses and validates the sub-agent's JSON. Invalid ranges are dropped;
/// zero surviving ranges is a failure (retry, then full-file fallback).
fn parse_payload(raw: &str, total_lines: usize) -> Result<Curation> {
    // Models occasionally wrap the payload in markdown fences; take the
    // outermost object.
    let start = raw.find('{');
    let end = raw.rfind('}');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(Error::stream("curator output contains no JSON object"));
    };
    if end < start {
        return Err(Error::stream("curator output contains no JSON object"));
    }

    let payload: CuratorPayload = serde_json::from_str(&raw[start..=end])
        .map_err(|e| Error::stream(format!("malformed curator JSON: {}", e)))?;

    let line_ranges: Vec<CuratedRange> = payload
        .line_ranges
        .into_iter()
        .filter(|r| {
            r.start >= 1
                && r.start <= r.end
                && r.end <= total_lines
                && r.end - r.start + 1 >= MIN_RANGE_LINES
        })
        .map(|r| CuratedRange {
            start: r.start,
            end: r.end,
            reason: r.reason,
        })
        .collect();

    if line_ranges.is_empty() {
        return Err(Error::stream("curator returned no valid line ranges"));
    }

    Ok(Curation {
        line_ranges,
        summary: payload.summary,
    })
}

/// Renders a cached curation as the line-numbered excerpt handed to the
/// model. The same cache entry always renders byte-identically for the same
/// file content.
pub fn render_excerpt(
    path: &Path,
    content: &str,
    total_lines: usize,
    cache: &CurationCache,
) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let preserved: usize = cache
        .line_ranges
        .iter()
        .map(|r| r.end.min(lines.len()).saturating_sub(r.start - 1))
        .sum();

    let mut out = format!(
        "📄 {} • {} lines total, {} preserved\nSummary: {}\n",
        path.display(),
        total_lines,
        preserved,
        cache.summary
    );

    for range in &cache.line_ranges {
        let end = range.end.min(lines.len());
        if range.start > end {
            continue;
        }
        out.push('\n');
        if range.reason.is_empty() {
            out.push_str(&format!("-- lines {}-{}\n", range.start, end));
        } else {
            out.push_str(&format!("-- lines {}-{}: {}\n", range.start, end, range.reason));
        }
        for (offset, line) in lines[range.start - 1..end].iter().enumerate() {
            out.push_str(&format!("{:5} | {}\n", range.start + offset, line));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload_valid() {
        let raw = r#"{"line_ranges":[{"start":1,"end":10,"reason":"imports"}],"summary":"a module","preserved_percentage":12.5}"#;
        let curation = parse_payload(raw, 100).unwrap();
        assert_eq!(curation.line_ranges.len(), 1);
        assert_eq!(curation.summary, "a module");
    }

    #[test]
    fn test_parse_payload_strips_markdown_fence() {
        let raw = "```json\n{\"line_ranges\":[{\"start\":2,\"end\":6}],\"summary\":\"s\"}\n```";
        let curation = parse_payload(raw, 10).unwrap();
        assert_eq!(curation.line_ranges[0].start, 2);
    }

    #[test]
    fn test_parse_payload_drops_invalid_ranges() {
        // Out of bounds, inverted, and too short ranges all dropped.
        let raw = r#"{"line_ranges":[
            {"start":0,"end":5},
            {"start":8,"end":4},
            {"start":1,"end":2},
            {"start":90,"end":200},
            {"start":10,"end":20,"reason":"kept"}
        ],"summary":"s"}"#;
        let curation = parse_payload(raw, 100).unwrap();
        assert_eq!(curation.line_ranges.len(), 1);
        assert_eq!(curation.line_ranges[0].reason, "kept");
    }

    #[test]
    fn test_parse_payload_all_invalid_is_error() {
        let raw = r#"{"line_ranges":[{"start":500,"end":600}],"summary":"s"}"#;
        assert!(parse_payload(raw, 100).is_err());
    }

    #[test]
    fn test_parse_payload_not_json_is_error() {
        assert!(parse_payload("I could not find anything relevant.", 100).is_err());
    }

    #[test]
    fn test_render_excerpt_header_and_ranges() {
        let content = (1..=20).map(|i| format!("line{}", i)).collect::<Vec<_>>().join("\n");
        let cache = CurationCache {
            conversation_hash: 0,
            line_ranges: vec![CuratedRange {
                start: 3,
                end: 5,
                reason: "core logic".to_string(),
            }],
            summary: "test file".to_string(),
            unix_ms: 0,
        };

        let excerpt = render_excerpt(Path::new("big.rs"), &content, 20, &cache);
        assert!(excerpt.contains("20 lines total, 3 preserved"));
        assert!(excerpt.contains("Summary: test file"));
        assert!(excerpt.contains("-- lines 3-5: core logic"));
        assert!(excerpt.contains("    4 | line4"));
    }

    #[test]
    fn test_render_excerpt_deterministic() {
        let content = "a\nb\nc\nd\ne\nf";
        let cache = CurationCache {
            conversation_hash: 9,
            line_ranges: vec![CuratedRange {
                start: 1,
                end: 4,
                reason: String::new(),
            }],
            summary: "s".to_string(),
            unix_ms: 0,
        };
        let a = render_excerpt(Path::new("x"), content, 6, &cache);
        let b = render_excerpt(Path::new("x"), content, 6, &cache);
        assert_eq!(a, b);
    }
}
