//! Tool-call reassembly across streaming deltas.
//!
//! Tool calls rarely arrive whole. Under the OpenAI wire format a single
//! call is spread over many chunks, interleaved with other calls:
//!
//! ```text
//! chunk 1: tool_calls[0] = { id: "call_a", function: { name: "read_file" } }
//! chunk 2: tool_calls[1] = { id: "call_b", function: { name: "get_current_time" } }
//! chunk 3: tool_calls[0] = { function: { arguments: "{\"pa" } }
//! chunk 4: tool_calls[0] = { function: { arguments: "th\":\"a.rs\"}" } }
//! ```
//!
//! The aggregator accumulates fragments keyed by the provider's `index`
//! (order-preserving), while Ollama's one-shot calls (complete JSON objects
//! in a single chunk) append directly. Finalization parses the assembled
//! argument JSON and synthesizes `call_<n>` ids where the provider sent
//! none.

use crate::types::ToolCall;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// A tool call being assembled from indexed deltas.
#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Stateful accumulator turning streamed deltas into complete [`ToolCall`]s.
#[derive(Debug, Default)]
pub struct ToolCallAggregator {
    /// Fragment-assembled calls, ordered by provider index.
    indexed: BTreeMap<u32, PartialToolCall>,

    /// Calls that arrived complete (Ollama style), in arrival order.
    complete: Vec<(Option<String>, String, serde_json::Value)>,

    synthesized: u64,
}

impl ToolCallAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one OpenAI-style delta.
    pub fn apply_delta(
        &mut self,
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments_fragment: Option<String>,
    ) {
        let entry = self.indexed.entry(index).or_default();
        if let Some(id) = id {
            entry.id = Some(id);
        }
        if let Some(name) = name {
            entry.name = Some(name);
        }
        if let Some(fragment) = arguments_fragment {
            entry.arguments.push_str(&fragment);
        }
    }

    /// Appends an Ollama-style complete call.
    pub fn push_complete(&mut self, id: Option<String>, name: String, arguments: serde_json::Value) {
        self.complete.push((id, name, arguments));
    }

    pub fn is_empty(&self) -> bool {
        self.indexed.is_empty() && self.complete.is_empty()
    }

    fn next_id(&mut self) -> String {
        self.synthesized += 1;
        format!("call_{}", self.synthesized)
    }

    /// Finalizes into a stable ordered vector: indexed calls first (by
    /// index), then one-shot calls in arrival order.
    ///
    /// # Errors
    ///
    /// Returns a stream error if an assembled argument string is not valid
    /// JSON (corrupted streaming, not a model mistake). Calls missing a name
    /// are dropped.
    pub fn finish(mut self) -> Result<Vec<ToolCall>> {
        let mut calls = Vec::new();

        let indexed = std::mem::take(&mut self.indexed);
        for (_, partial) in indexed {
            let Some(name) = partial.name else {
                continue;
            };
            let arguments: serde_json::Value = if partial.arguments.is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&partial.arguments).map_err(|e| {
                    Error::stream(format!("failed to parse tool arguments: {}", e))
                })?
            };
            let id = match partial.id {
                Some(id) => id,
                None => self.next_id(),
            };
            calls.push(ToolCall::new(id, name, arguments));
        }

        let complete = std::mem::take(&mut self.complete);
        for (id, name, arguments) in complete {
            let id = match id {
                Some(id) => id,
                None => self.next_id(),
            };
            calls.push(ToolCall::new(id, name, arguments));
        }

        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fragmented_arguments_reassemble() {
        let mut agg = ToolCallAggregator::new();
        agg.apply_delta(0, Some("call_a".to_string()), Some("read_file".to_string()), None);
        agg.apply_delta(0, None, None, Some("{\"pa".to_string()));
        agg.apply_delta(0, None, None, Some("th\":\"a.rs\"}".to_string()));

        let calls = agg.finish().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments["path"], "a.rs");
    }

    #[test]
    fn test_interleaved_calls_keep_index_order() {
        let mut agg = ToolCallAggregator::new();
        agg.apply_delta(1, Some("call_b".to_string()), Some("second".to_string()), None);
        agg.apply_delta(0, Some("call_a".to_string()), Some("first".to_string()), None);
        agg.apply_delta(1, None, None, Some("{}".to_string()));
        agg.apply_delta(0, None, None, Some("{}".to_string()));

        let calls = agg.finish().unwrap();
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[1].name, "second");
    }

    #[test]
    fn test_missing_id_synthesized() {
        let mut agg = ToolCallAggregator::new();
        agg.apply_delta(0, None, Some("get_file_tree".to_string()), Some("{}".to_string()));
        agg.push_complete(None, "get_current_time".to_string(), json!({}));

        let calls = agg.finish().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[1].id, "call_2");
    }

    #[test]
    fn test_empty_arguments_default_to_object() {
        let mut agg = ToolCallAggregator::new();
        agg.apply_delta(0, Some("call_x".to_string()), Some("list_tasks".to_string()), None);

        let calls = agg.finish().unwrap();
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn test_nameless_call_dropped() {
        let mut agg = ToolCallAggregator::new();
        agg.apply_delta(0, Some("call_x".to_string()), None, Some("{}".to_string()));
        assert!(agg.finish().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_json_is_stream_error() {
        let mut agg = ToolCallAggregator::new();
        agg.apply_delta(0, Some("c".to_string()), Some("t".to_string()), Some("{broken".to_string()));
        assert!(matches!(agg.finish(), Err(Error::Stream(_))));
    }

    #[test]
    fn test_ollama_one_shot_preserves_object() {
        let mut agg = ToolCallAggregator::new();
        agg.push_complete(
            None,
            "read_lines".to_string(),
            json!({"path": "src/lib.rs", "start": 1, "end": 40}),
        );

        let calls = agg.finish().unwrap();
        assert_eq!(calls[0].arguments["start"], 1);
        assert_eq!(calls[0].arguments["end"], 40);
    }
}
