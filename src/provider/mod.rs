//! LLM provider clients.
//!
//! Two backends behind one abstraction: [`ollama`] (native `/api/chat` +
//! `/api/embed`, NDJSON streaming) and [`lmstudio`] (OpenAI-compatible
//! `/v1/chat/completions` + `/v1/embeddings`, SSE streaming). Both normalize
//! their wire formats into the crate's canonical [`StreamEvent`]s and
//! finalize into a [`StreamOutcome`].

mod aggregate;
pub mod lmstudio;
pub mod ollama;

pub use aggregate::ToolCallAggregator;

use crate::config::{Config, Provider};
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::types::{Message, ToolCall};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Provider-tunable request options.
///
/// Options a backend does not understand are silently dropped by that
/// backend (`num_ctx`, `keep_alive`, and `enable_thinking` are Ollama-only).
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub temperature: f32,
    pub num_ctx: usize,
    /// Generation cap; negative means provider default.
    pub num_predict: i64,
    /// Ollama model keep-alive hint, e.g. "5m".
    pub keep_alive: Option<String>,
    /// Request the model's internal reasoning stream (Ollama only).
    pub enable_thinking: bool,
    /// Ask for strict-JSON output.
    pub format_json: bool,
    pub stream: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            num_ctx: 16384,
            num_predict: -1,
            keep_alive: None,
            enable_thinking: false,
            format_json: false,
            stream: true,
        }
    }
}

impl ChatOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temperature: config.temperature,
            num_ctx: config.num_ctx,
            num_predict: config.num_predict,
            keep_alive: None,
            enable_thinking: config.enable_thinking,
            format_json: false,
            stream: true,
        }
    }
}

/// One normalized record from the chat stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Append-only text.
    TextDelta(String),

    /// Partial tool call, keyed by provider index. OpenAI-style arguments
    /// arrive as string fragments; Ollama-style arrive whole via
    /// `arguments_object`.
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments_fragment: Option<String>,
        arguments_object: Option<serde_json::Value>,
    },

    /// Generation finished.
    Done { finish_reason: Option<String> },
}

/// Receives normalized stream records as they arrive.
///
/// The master loop uses this to repaint text incrementally; tests use it to
/// record event order.
pub trait StreamSink: Send {
    fn event(&mut self, event: StreamEvent);
}

/// A sink that discards everything (single-shot sub-agent calls).
pub struct NullSink;

impl StreamSink for NullSink {
    fn event(&mut self, _event: StreamEvent) {}
}

/// Why generation stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other(String),
}

impl FinishReason {
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "done" => FinishReason::Stop,
            "tool_calls" | "tool_use" => FinishReason::ToolCalls,
            "length" | "max_tokens" => FinishReason::Length,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// Finalized result of one streamed chat request.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub full_text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    /// Set when the request was cancelled mid-stream; `full_text` holds
    /// whatever arrived before the cancel and `tool_calls` is empty.
    pub cancelled: bool,
}

impl StreamOutcome {
    pub fn cancelled_with(text: String) -> Self {
        Self {
            full_text: text,
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            cancelled: true,
        }
    }
}

/// Cooperative cancellation flag shared between the UI task and the
/// streaming ingestion loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Rearms the token for the next request.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// One chat request: canonical messages plus tool schemas in OpenAI
/// `function` form.
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [serde_json::Value],
    pub options: &'a ChatOptions,
}

/// The provider abstraction the master loop drives.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Streams one chat completion, emitting normalized events to `sink`,
    /// checking `cancel` at every network suspension point. Partial text up
    /// to a cancel is preserved in the outcome.
    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
        sink: &mut dyn StreamSink,
        cancel: &CancelToken,
    ) -> Result<StreamOutcome>;

    /// Embeds a batch of texts. Callers wanting resilience go through
    /// [`embed_with_retry`].
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn name(&self) -> &'static str;
}

/// Embeddings with bounded exponential backoff (at least 3 attempts).
/// Chat streaming is never auto-retried: the model may already have
/// produced side-effect-causing tool calls.
pub async fn embed_with_retry(
    provider: &dyn ChatProvider,
    model: &str,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    retry_with_backoff(RetryConfig::default().with_max_attempts(3), || {
        provider.embed(model, texts)
    })
    .await
}

/// Instantiates the configured backend client.
pub fn build_provider(config: &Config) -> Result<Box<dyn ChatProvider>> {
    match config.provider {
        Provider::Ollama => Ok(Box::new(ollama::OllamaProvider::new(config.active_host())?)),
        Provider::LMStudio => {
            if config.enable_thinking {
                log::warn!("enable_thinking is not supported by lmstudio; ignoring");
            }
            Ok(Box::new(lmstudio::LmStudioProvider::new(config.active_host())?))
        }
    }
}

/// Sink capturing events in order; shared by provider unit tests.
#[cfg(test)]
pub(crate) struct RecordingSink {
    pub events: Vec<StreamEvent>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }
}

#[cfg(test)]
impl StreamSink for RecordingSink {
    fn event(&mut self, event: StreamEvent) {
        self.events.push(event);
    }
}
