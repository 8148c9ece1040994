//! The master loop.
//!
//! Owns the conversation: interleaves streaming, tool execution,
//! compression, and hot-context injection for one user turn at a time.
//! Message list layout invariant: index 0 is the immutable system prompt,
//! index 1 the hot-context slot (content re-synthesized before every send);
//! everything after is history in causal order.

use crate::compression::{self, CompressionMode};
use crate::config::Config;
use crate::estimator::TokenEstimator;
use crate::hot_context;
use crate::machine::{MachineDeps, TickAction, ToolMachine};
use crate::permissions::{PermissionEngine, PolicyStore, PromptResponse, RiskLevel};
use crate::provider::{
    CancelToken, ChatOptions, ChatProvider, ChatRequest, StreamEvent, StreamSink,
};
use crate::tasks::TaskList;
use crate::tools::ToolRegistry;
use crate::tracker::ContextTracker;
use crate::types::Message;
use crate::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// UI seam the loop drives. Text rendering and notifications are
/// synchronous (a terminal write); the permission prompt suspends on user
/// input.
#[async_trait]
pub trait Host: Send {
    /// Append-only streamed assistant text.
    fn render_text(&mut self, delta: &str);

    /// Out-of-band status line (banners, tool progress, diagnostics).
    fn notify(&mut self, line: &str);

    /// Render a permission prompt and return the user's decision.
    /// `risk` is High for mutating tools; render a warning.
    async fn permission_prompt(
        &mut self,
        tool_name: &str,
        arguments: &serde_json::Value,
        risk: RiskLevel,
    ) -> PromptResponse;
}

/// Forwards text deltas to the host while keeping a copy, so a network
/// failure or cancel mid-stream still preserves the partial assistant text.
struct TurnSink<'h> {
    host: &'h mut dyn Host,
    text: String,
}

impl StreamSink for TurnSink<'_> {
    fn event(&mut self, event: StreamEvent) {
        if let StreamEvent::TextDelta(delta) = event {
            self.text.push_str(&delta);
            self.host.render_text(&delta);
        }
    }
}

/// The conversation owner.
pub struct MasterLoop {
    config: Config,
    provider: Box<dyn ChatProvider>,
    registry: ToolRegistry,
    permissions: PermissionEngine,
    tracker: ContextTracker,
    tasks: TaskList,
    machine: ToolMachine,
    estimator: TokenEstimator,
    messages: Vec<Message>,
    workdir: PathBuf,
    cancel: CancelToken,
    compression_mode: CompressionMode,
}

const SYSTEM_PROMPT: &str = "You are a coding assistant working in the user's \
terminal. You can inspect and edit files, manage tasks, and check the time \
through tools. Prefer small, verifiable steps; read before you write; report \
what you changed.";

impl MasterLoop {
    pub fn new(
        config: Config,
        provider: Box<dyn ChatProvider>,
        workdir: PathBuf,
        policy_store: PolicyStore,
    ) -> Self {
        let messages = vec![Message::system(SYSTEM_PROMPT), Message::system("")];
        let mut estimator = TokenEstimator::new();
        estimator.recompute(&messages);

        Self {
            config,
            provider,
            registry: ToolRegistry::with_baseline(),
            permissions: PermissionEngine::new(policy_store),
            tracker: ContextTracker::new(),
            tasks: TaskList::new(),
            machine: ToolMachine::new(),
            estimator,
            messages,
            workdir,
            cancel: CancelToken::new(),
            compression_mode: CompressionMode::Deterministic,
        }
    }

    /// Token for out-of-band cancellation (Ctrl+C task).
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn set_compression_mode(&mut self, mode: CompressionMode) {
        self.compression_mode = mode;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tracker(&self) -> &ContextTracker {
        &self.tracker
    }

    pub fn tasks(&self) -> &TaskList {
        &self.tasks
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    fn push_message(&mut self, msg: Message) {
        self.estimator.add(&msg);
        self.messages.push(msg);
    }

    /// Records a display-only line in the history (banners, status text).
    /// Never sent to the model, never counted against the token budget, and
    /// dropped outright by compression.
    pub fn push_display_note(&mut self, text: impl Into<String>) {
        self.push_message(Message::display_only(text));
    }

    /// Runs one user turn to completion: streaming, tool iterations,
    /// compression, and bookkeeping. Returns when the turn ends (normally,
    /// by cancellation, or at the iteration cap).
    pub async fn run_turn(&mut self, input: &str, host: &mut dyn Host) -> Result<()> {
        let input = input.trim();
        if input.is_empty() {
            // No LLM call for empty input.
            return Ok(());
        }

        self.cancel.reset();
        self.machine.reset_turn();
        self.push_message(Message::user(input));

        loop {
            // 1. Compress if the budget is being approached.
            if self.estimator.needs_compression(
                &self.config.compression,
                self.config.num_ctx,
                self.messages.len(),
            ) {
                let report = compression::compress(
                    &mut self.messages,
                    &self.tracker,
                    Some(self.provider.as_ref()),
                    &self.config,
                    self.compression_mode,
                )
                .await;
                self.estimator.recompute(&self.messages);
                host.notify(&format!(
                    "compressed history: {} → {} estimated tokens ({} transformed, {} dropped)",
                    report.tokens_before, report.tokens_after, report.transformed, report.dropped
                ));
            }

            // 2. Refresh the hot-context slot at index 1.
            let snapshot = hot_context::build(&self.tracker, &self.tasks, &self.messages);
            self.messages[1].set_content(snapshot);
            self.estimator.recompute(&self.messages);

            // 3. Stream one model response.
            let schemas = self.registry.schemas();
            let options = ChatOptions::from_config(&self.config);
            let mut sink = TurnSink {
                host: &mut *host,
                text: String::new(),
            };
            let request = ChatRequest {
                model: &self.config.model,
                messages: &self.messages,
                tools: &schemas,
                options: &options,
            };
            let outcome = match self
                .provider
                .chat_stream(request, &mut sink, &self.cancel)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Surface the failure but keep whatever text streamed.
                    let partial = sink.text;
                    if !partial.is_empty() {
                        self.push_message(Message::assistant(partial));
                    }
                    host.notify(&format!("⚠ provider error: {}", e));
                    return Ok(());
                }
            };

            // 4a. Cancelled: keep the partial text, drop any tool calls.
            if outcome.cancelled {
                self.push_message(Message::assistant(outcome.full_text));
                host.notify("cancelled");
                return Ok(());
            }

            // 4b. No tool calls: store the (possibly empty) assistant
            // message; the turn is complete.
            if outcome.tool_calls.is_empty() {
                self.push_message(Message::assistant(outcome.full_text));
                return Ok(());
            }

            // 5. Tool iteration.
            if self.config.show_tool_json {
                for call in &outcome.tool_calls {
                    host.notify(&format!("→ {} {}", call.name, call.arguments));
                }
            }
            self.push_message(Message::assistant_with_tool_calls(
                outcome.full_text,
                outcome.tool_calls.clone(),
            ));
            self.machine.begin_iteration(outcome.tool_calls);

            let (results, should_continue, diagnostic) = loop {
                let action = {
                    let mut deps = MachineDeps {
                        registry: &self.registry,
                        permissions: &mut self.permissions,
                        config: &self.config,
                        tracker: &mut self.tracker,
                        tasks: &mut self.tasks,
                        workdir: &self.workdir,
                        conversation: &self.messages,
                        provider: Some(self.provider.as_ref()),
                    };
                    self.machine.tick(&mut deps).await
                };

                match action {
                    TickAction::ShowPermissionPrompt {
                        tool_name,
                        arguments,
                        risk,
                    } => {
                        let response = host.permission_prompt(&tool_name, &arguments, risk).await;
                        self.machine.resolve_permission(response);
                    }
                    TickAction::RenderRequested { line } => {
                        if !line.is_empty() {
                            host.notify(&line);
                        }
                    }
                    TickAction::IterationComplete {
                        results,
                        should_continue,
                        diagnostic,
                    } => break (results, should_continue, diagnostic),
                }
            };

            // Tool results are appended in the order their calls appeared.
            for (call, result) in results {
                self.push_message(Message::tool(call.id, result.to_json_string()));
            }

            if let Some(diagnostic) = diagnostic {
                host.notify(&diagnostic);
                self.push_message(Message::assistant(diagnostic));
                return Ok(());
            }
            if !should_continue {
                return Ok(());
            }
            // Loop back: compression check, fresh hot context, next request.
        }
    }
}
