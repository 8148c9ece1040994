//! LM Studio provider: OpenAI-compatible `/v1/chat/completions` over SSE.
//!
//! Each SSE frame carries a `chat.completion.chunk` object; the stream is
//! terminated by `data: [DONE]`. Tool-call arguments arrive as string
//! fragments keyed by index and are reassembled by the shared aggregator.

use crate::provider::{
    CancelToken, ChatProvider, ChatRequest, FinishReason, StreamEvent, StreamOutcome, StreamSink,
    ToolCallAggregator,
};
use crate::types::{Message, MessageRole};
use crate::{Error, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

pub struct LmStudioProvider {
    client: reqwest::Client,
    base_url: String,
}

impl LmStudioProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(60))
            .build()
            .map_err(Error::Http)?;
        Ok(Self { client, base_url })
    }

    fn v1_url(&self, endpoint: &str) -> String {
        let base = self.base_url.strip_suffix("/v1").unwrap_or(&self.base_url);
        format!("{}/v1/{}", base, endpoint)
    }
}

// Wire types for the streamed chunk, mirroring OpenAI's
// `chat.completion.chunk`.

#[derive(Debug, Deserialize)]
struct ChatChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDeltaWire>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDeltaWire {
    index: u32,
    id: Option<String>,
    function: Option<FunctionDeltaWire>,
}

#[derive(Debug, Deserialize)]
struct FunctionDeltaWire {
    name: Option<String>,
    arguments: Option<String>,
}

/// Converts canonical messages to OpenAI wire form. Tool-call arguments are
/// serialized to strings; tool results carry their `tool_call_id`.
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.role {
            MessageRole::DisplayOnlyData => continue,
            // An empty system message is a vacant hot-context slot.
            MessageRole::System if msg.content.is_empty() => continue,
            MessageRole::System => wire.push(json!({"role": "system", "content": msg.content})),
            MessageRole::User => wire.push(json!({"role": "user", "content": msg.content})),
            MessageRole::Assistant => {
                let mut m = json!({"role": "assistant", "content": msg.content});
                if let Some(calls) = &msg.tool_calls {
                    m["tool_calls"] = Value::Array(
                        calls
                            .iter()
                            .map(|c| {
                                json!({
                                    "id": c.id,
                                    "type": "function",
                                    "function": {
                                        "name": c.name,
                                        "arguments": c.arguments.to_string(),
                                    }
                                })
                            })
                            .collect(),
                    );
                }
                wire.push(m);
            }
            MessageRole::Tool => {
                let mut m = json!({"role": "tool", "content": msg.content});
                if let Some(id) = &msg.tool_call_id {
                    m["tool_call_id"] = json!(id);
                }
                wire.push(m);
            }
        }
    }
    wire
}

fn build_request_body(request: &ChatRequest<'_>) -> Value {
    let opts = request.options;

    let mut body = json!({
        "model": request.model,
        "messages": convert_messages(request.messages),
        "stream": opts.stream,
        "temperature": opts.temperature,
    });

    // num_ctx / keep_alive / enable_thinking are Ollama-isms; silently
    // dropped here per the options contract.
    if opts.num_predict >= 0 {
        body["max_tokens"] = json!(opts.num_predict);
    }
    if opts.format_json {
        body["response_format"] = json!({"type": "json_object"});
    }
    if !request.tools.is_empty() {
        body["tools"] = json!(request.tools);
    }

    body
}

/// Applies one parsed chunk. Returns the finish_reason once present.
fn process_chunk(
    chunk: ChatChunk,
    sink: &mut dyn StreamSink,
    text: &mut String,
    aggregator: &mut ToolCallAggregator,
) -> Option<String> {
    let mut finish = None;

    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                text.push_str(&content);
                sink.event(StreamEvent::TextDelta(content));
            }
        }

        if let Some(deltas) = choice.delta.tool_calls {
            for delta in deltas {
                let (name, fragment) = match delta.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                sink.event(StreamEvent::ToolCallDelta {
                    index: delta.index,
                    id: delta.id.clone(),
                    name: name.clone(),
                    arguments_fragment: fragment.clone(),
                    arguments_object: None,
                });
                aggregator.apply_delta(delta.index, delta.id, name, fragment);
            }
        }

        if let Some(reason) = choice.finish_reason {
            finish = Some(reason);
        }
    }

    finish
}

#[async_trait]
impl ChatProvider for LmStudioProvider {
    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
        sink: &mut dyn StreamSink,
        cancel: &CancelToken,
    ) -> Result<StreamOutcome> {
        let url = self.v1_url("chat/completions");
        let body = build_request_body(&request);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(format!("LM Studio error {}: {}", status, body)));
        }

        let mut events = Box::pin(response.bytes_stream().eventsource());
        let mut text = String::new();
        let mut aggregator = ToolCallAggregator::new();
        let mut finish_reason: Option<String> = None;

        while let Some(event) = events.next().await {
            if cancel.is_cancelled() {
                return Ok(StreamOutcome::cancelled_with(text));
            }

            let event = event.map_err(|e| Error::stream(format!("SSE error: {}", e)))?;
            if event.data == "[DONE]" {
                break;
            }

            let chunk: ChatChunk = match serde_json::from_str(&event.data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    log::warn!("skipping malformed SSE chunk ({})", e);
                    continue;
                }
            };

            if let Some(reason) = process_chunk(chunk, sink, &mut text, &mut aggregator) {
                finish_reason = Some(reason);
            }
        }

        sink.event(StreamEvent::Done {
            finish_reason: finish_reason.clone(),
        });

        let tool_calls = aggregator.finish()?;
        let finish_reason = match finish_reason.as_deref() {
            Some(reason) => FinishReason::from_wire(reason),
            None if !tool_calls.is_empty() => FinishReason::ToolCalls,
            None => FinishReason::Stop,
        };

        Ok(StreamOutcome {
            full_text: text,
            tool_calls,
            finish_reason,
            cancelled: false,
        })
    }

    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        #[derive(Deserialize)]
        struct EmbeddingsResponse {
            data: Vec<EmbeddingEntry>,
        }

        #[derive(Deserialize)]
        struct EmbeddingEntry {
            embedding: Vec<f32>,
        }

        log::debug!(target: "embeddings", "embedding {} texts via lmstudio", texts.len());

        let response = self
            .client
            .post(self.v1_url("embeddings"))
            .json(&json!({"model": model, "input": texts}))
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(format!(
                "LM Studio embeddings error {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingsResponse = response.json().await.map_err(Error::Http)?;
        Ok(parsed.data.into_iter().map(|e| e.embedding).collect())
    }

    fn name(&self) -> &'static str {
        "lmstudio"
    }
}
