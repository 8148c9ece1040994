//! Shared test harness: a scripted mock provider and a collecting host.

// Each integration-test binary compiles this module and uses a subset.
#![allow(dead_code)]

use async_trait::async_trait;
use codeloop::provider::{
    CancelToken, ChatProvider, ChatRequest, FinishReason, StreamEvent, StreamOutcome, StreamSink,
};
use codeloop::{Host, Message, MessageRole, PromptResponse, RiskLevel, Result, ToolCall};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One scripted model response.
#[derive(Clone)]
pub struct Script {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Script {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tools(calls: Vec<ToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls: calls,
        }
    }
}

/// Scripted provider: pops one script per request, streaming its text in
/// chunks (checking the cancel token between chunks, like a real client
/// checks per network read). With `repeat_last`, the final script repeats
/// forever: the pathological always-calls-a-tool model.
pub struct MockProvider {
    scripts: Mutex<VecDeque<Script>>,
    repeat_last: bool,
    /// Snapshot of the message list of every request, for send-time
    /// assertions.
    pub requests: Mutex<Vec<Vec<Message>>>,
}

const CHUNK: usize = 64;

impl MockProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            repeat_last: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(script: Script) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::from([script])),
            repeat_last: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
        sink: &mut dyn StreamSink,
        cancel: &CancelToken,
    ) -> Result<StreamOutcome> {
        self.requests
            .lock()
            .unwrap()
            .push(request.messages.to_vec());

        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if self.repeat_last && scripts.len() == 1 {
                scripts[0].clone()
            } else {
                scripts.pop_front().expect("mock provider ran out of scripts")
            }
        };

        let mut streamed = String::new();
        let mut rest = script.text.as_str();
        while !rest.is_empty() {
            if cancel.is_cancelled() {
                return Ok(StreamOutcome::cancelled_with(streamed));
            }
            let mut cut = CHUNK.min(rest.len());
            while !rest.is_char_boundary(cut) {
                cut += 1;
            }
            let (chunk, tail) = rest.split_at(cut);
            streamed.push_str(chunk);
            sink.event(StreamEvent::TextDelta(chunk.to_string()));
            rest = tail;
        }

        if cancel.is_cancelled() {
            return Ok(StreamOutcome::cancelled_with(streamed));
        }

        for call in &script.tool_calls {
            sink.event(StreamEvent::ToolCallDelta {
                index: 0,
                id: Some(call.id.clone()),
                name: Some(call.name.clone()),
                arguments_fragment: None,
                arguments_object: Some(call.arguments.clone()),
            });
        }
        let finish_reason = if script.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };
        sink.event(StreamEvent::Done { finish_reason: None });

        Ok(StreamOutcome {
            full_text: streamed,
            tool_calls: script.tool_calls,
            finish_reason,
            cancelled: false,
        })
    }

    async fn embed(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.0, 1.0]).collect())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Delegating wrapper so a test can hand the loop ownership of a provider
/// while keeping its own handle for assertions.
pub struct SharedProvider(pub std::sync::Arc<MockProvider>);

#[async_trait]
impl ChatProvider for SharedProvider {
    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
        sink: &mut dyn StreamSink,
        cancel: &CancelToken,
    ) -> Result<StreamOutcome> {
        self.0.chat_stream(request, sink, cancel).await
    }

    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.0.embed(model, texts).await
    }

    fn name(&self) -> &'static str {
        self.0.name()
    }
}

/// Host that records everything and answers every permission prompt the
/// same way. Optionally fires a cancel token once enough text has arrived.
pub struct CollectingHost {
    pub text: String,
    pub notifications: Vec<String>,
    pub prompts: Vec<String>,
    pub response: PromptResponse,
    pub cancel_after: Option<(CancelToken, usize)>,
}

impl CollectingHost {
    pub fn allowing() -> Self {
        Self::with_response(PromptResponse::AllowOnce)
    }

    pub fn with_response(response: PromptResponse) -> Self {
        Self {
            text: String::new(),
            notifications: Vec::new(),
            prompts: Vec::new(),
            response,
            cancel_after: None,
        }
    }
}

#[async_trait]
impl Host for CollectingHost {
    fn render_text(&mut self, delta: &str) {
        self.text.push_str(delta);
        if let Some((token, limit)) = &self.cancel_after {
            if self.text.len() >= *limit {
                token.cancel();
            }
        }
    }

    fn notify(&mut self, line: &str) {
        self.notifications.push(line.to_string());
    }

    async fn permission_prompt(
        &mut self,
        tool_name: &str,
        _arguments: &serde_json::Value,
        _risk: RiskLevel,
    ) -> PromptResponse {
        self.prompts.push(tool_name.to_string());
        self.response
    }
}

/// Invariant 1: every tool call id in an assistant message is answered by a
/// subsequent tool-role message before the next assistant message.
pub fn assert_tool_messages_complete(messages: &[Message]) {
    for (idx, msg) in messages.iter().enumerate() {
        let Some(calls) = &msg.tool_calls else {
            continue;
        };
        for call in calls {
            let answered = messages[idx + 1..].iter().any(|m| {
                m.role == MessageRole::Tool && m.tool_call_id.as_deref() == Some(call.id.as_str())
            });
            assert!(
                answered,
                "tool call {} ({}) has no tool-role result message",
                call.id, call.name
            );
        }
    }
}
