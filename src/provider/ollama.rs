//! Ollama native API provider.
//!
//! Ollama streams NDJSON, not SSE: each response line is a complete JSON
//! object. Tool calls appear in intermediate (`done:false`) chunks as whole
//! JSON objects, so they are accumulated across ALL chunks rather than
//! reassembled from fragments.

use crate::provider::{
    CancelToken, ChatProvider, ChatRequest, FinishReason, StreamEvent, StreamOutcome, StreamSink,
    ToolCallAggregator,
};
use crate::types::{Message, MessageRole};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            // Bounded time without bytes, not total request time: a healthy
            // generation can stream for many minutes.
            .read_timeout(Duration::from_secs(60))
            .build()
            .map_err(Error::Http)?;
        Ok(Self { client, base_url })
    }

    /// Users sometimes configure the base URL with the `/v1` suffix used for
    /// OpenAI compatibility; strip it for the native API.
    fn api_url(&self, endpoint: &str) -> String {
        let base = self.base_url.strip_suffix("/v1").unwrap_or(&self.base_url);
        format!("{}/api/{}", base, endpoint)
    }
}

/// One chunk from the NDJSON stream.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OllamaChatChunk {
    message: OllamaChunkMessage,
    done: bool,
    done_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OllamaChunkMessage {
    content: String,
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaToolCall {
    function: OllamaToolCallFunction,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaToolCallFunction {
    name: String,
    arguments: Value,
}

/// Converts canonical messages to the Ollama wire shape. Display-only
/// messages never leave the process.
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
                                    "function": {
                                        "name": c.name,
                                        "arguments": c.arguments,
                                    }
                                })
                            })
                            .collect(),
                    );
                }
                wire.push(m);
            }
            MessageRole::Tool => wire.push(json!({"role": "tool", "content": msg.content})),
        }
    }
    wire
}

fn build_request_body(request: &ChatRequest<'_>) -> Value {
    let opts = request.options;

    // Ollama defaults num_ctx to 4096, far too small once the system prompt
    // and tool schemas are in play.
    let mut options = json!({
        "num_ctx": opts.num_ctx,
        "temperature": opts.temperature,
    });
    if opts.num_predict >= 0 {
        options["num_predict"] = json!(opts.num_predict);
    }

    let mut body = json!({
        "model": request.model,
        "messages": convert_messages(request.messages),
        "stream": opts.stream,
        "options": options,
    });

    if let Some(keep_alive) = &opts.keep_alive {
        body["keep_alive"] = json!(keep_alive);
    }
    if opts.enable_thinking {
        body["think"] = json!(true);
    }
    if opts.format_json {
        body["format"] = json!("json");
    }
    if !request.tools.is_empty() {
        body["tools"] = json!(request.tools);
    }

    body
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
        sink: &mut dyn StreamSink,
        cancel: &CancelToken,
    ) -> Result<StreamOutcome> {
        let url = self.api_url("chat");
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
            return Err(Error::api(format!("Ollama error {}: {}", status, body)));
        }

        let mut byte_stream = Box::pin(response.bytes_stream());
        let mut line_buffer = String::new();
        let mut text = String::new();
        let mut aggregator = ToolCallAggregator::new();
        let mut done_reason: Option<String> = None;
        let mut finished = false;

        'outer: while let Some(chunk) = byte_stream.next().await {
            if cancel.is_cancelled() {
                // Dropping the stream closes the connection.
                return Ok(StreamOutcome::cancelled_with(text));
            }

            let bytes = chunk.map_err(|e| Error::stream(format!("read error: {}", e)))?;
            line_buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = line_buffer.find('\n') {
                let line = line_buffer[..newline].trim().to_string();
                line_buffer.drain(..=newline);
                if line.is_empty() {
                    continue;
                }

                if process_line(&line, sink, &mut text, &mut aggregator, &mut done_reason)? {
                    finished = true;
                    break 'outer;
                }
            }
        }

        // A chunk may arrive without a trailing newline at stream end.
        if !finished {
            let trailing = line_buffer.trim().to_string();
            if !trailing.is_empty() {
                finished =
                    process_line(&trailing, sink, &mut text, &mut aggregator, &mut done_reason)?;
            }
        }

        if !finished {
            return Err(Error::stream("Ollama stream ended without a done chunk"));
        }

        let tool_calls = aggregator.finish()?;
        let finish_reason = match done_reason.as_deref() {
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
        struct EmbedResponse {
            embeddings: Vec<Vec<f32>>,
        }

        log::debug!(target: "embeddings", "embedding {} texts via ollama", texts.len());

        let response = self
            .client
            .post(self.api_url("embed"))
            .json(&json!({"model": model, "input": texts}))
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(format!("Ollama embed error {}: {}", status, body)));
        }

        let parsed: EmbedResponse = response.json().await.map_err(Error::Http)?;
        Ok(parsed.embeddings)
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

/// Parses one NDJSON line, forwarding events to the sink. Returns true when
/// the `done` chunk was seen. Malformed lines are skipped with a warning.
fn process_line(
    line: &str,
    sink: &mut dyn StreamSink,
    text: &mut String,
    aggregator: &mut ToolCallAggregator,
    done_reason: &mut Option<String>,
) -> Result<bool> {
    let chunk: OllamaChatChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            log::warn!(
                "skipping malformed NDJSON line ({}): {}",
                e,
                &line[..line.len().min(120)]
            );
            return Ok(false);
        }
    };

    if !chunk.message.content.is_empty() {
        text.push_str(&chunk.message.content);
        sink.event(StreamEvent::TextDelta(chunk.message.content));
    }

    // Tool calls arrive whole in intermediate chunks.
    if let Some(calls) = chunk.message.tool_calls {
        for call in calls {
            sink.event(StreamEvent::ToolCallDelta {
                index: 0,
                id: None,
                name: Some(call.function.name.clone()),
                arguments_fragment: None,
                arguments_object: Some(call.function.arguments.clone()),
            });
            aggregator.push_complete(None, call.function.name, call.function.arguments);
        }
    }

    if chunk.done {
        *done_reason = chunk.done_reason;
        sink.event(StreamEvent::Done {
            finish_reason: done_reason.clone(),
        });
        return Ok(true);
    }

    Ok(false)
}
