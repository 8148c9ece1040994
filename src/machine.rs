//! Tool-execution state machine.
//!
//! Per-iteration permission/exec orchestration exposed as a cooperative
//! ticker. `tick()` never blocks the host: each call performs bounded work
//! (at most one tool execution) and returns an action for the host to
//! perform. Permission prompts round-trip through the host via
//! [`ToolMachine::resolve_permission`].
//!
//! Two independent caps bound a turn: at most [`MAX_TOOL_CALLS_PER_ITERATION`]
//! calls per iteration and [`MAX_ITERATIONS_PER_TURN`] iterations per user
//! turn. A violation completes the iteration immediately with a synthesized
//! diagnostic and error results for every requested call, so the
//! tool-message invariant still holds.

use crate::config::Config;
use crate::permissions::{Decision, PermissionEngine, PromptResponse, RiskLevel, denied_result};
use crate::provider::ChatProvider;
use crate::tasks::TaskList;
use crate::tools::{ToolContext, ToolRegistry};
use crate::tracker::ContextTracker;
use crate::types::{ErrorKind, Message, ToolCall, ToolResult};
use std::collections::VecDeque;
use std::path::Path;

pub const MAX_TOOL_CALLS_PER_ITERATION: usize = 15;
pub const MAX_ITERATIONS_PER_TURN: u32 = 10;

/// Machine state, advanced one tick at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Idle,
    EvaluatingPolicy,
    AwaitingPermission,
    Executing,
    Completed,
}

/// What the host must do after a tick.
#[derive(Debug)]
pub enum TickAction {
    /// Render a permission prompt and report the decision back via
    /// [`ToolMachine::resolve_permission`], then tick again.
    ShowPermissionPrompt {
        tool_name: String,
        arguments: serde_json::Value,
        risk: RiskLevel,
    },

    /// Repaint: one tool finished (successfully or not).
    RenderRequested { line: String },

    /// The iteration is over. The host appends the results as tool-role
    /// messages in order and, if `should_continue`, sends the next LLM
    /// request.
    IterationComplete {
        results: Vec<(ToolCall, ToolResult)>,
        should_continue: bool,
        diagnostic: Option<String>,
    },
}

/// Borrowed dependencies for one tick.
pub struct MachineDeps<'a> {
    pub registry: &'a ToolRegistry,
    pub permissions: &'a mut PermissionEngine,
    pub config: &'a Config,
    pub tracker: &'a mut ContextTracker,
    pub tasks: &'a mut TaskList,
    pub workdir: &'a Path,
    pub conversation: &'a [Message],
    pub provider: Option<&'a dyn ChatProvider>,
}

pub struct ToolMachine {
    state: MachineState,
    queue: VecDeque<ToolCall>,
    current: Option<ToolCall>,
    results: Vec<(ToolCall, ToolResult)>,
    pending_response: Option<PromptResponse>,
    iterations: u32,
    /// Set when a cap violation pre-completed the iteration.
    violation: Option<String>,
}

impl Default for ToolMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolMachine {
    pub fn new() -> Self {
        Self {
            state: MachineState::Idle,
            queue: VecDeque::new(),
            current: None,
            results: Vec::new(),
            pending_response: None,
            iterations: 0,
            violation: None,
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Resets the per-turn iteration counter. Call at the start of every
    /// user turn.
    pub fn reset_turn(&mut self) {
        self.state = MachineState::Idle;
        self.queue.clear();
        self.current = None;
        self.results.clear();
        self.pending_response = None;
        self.iterations = 0;
        self.violation = None;
    }

    /// Loads one iteration's tool calls. Cap violations synthesize error
    /// results for every call and flag the iteration as terminal.
    pub fn begin_iteration(&mut self, calls: Vec<ToolCall>) {
        self.results.clear();
        self.queue.clear();
        self.current = None;
        self.pending_response = None;

        if self.iterations >= MAX_ITERATIONS_PER_TURN {
            let diagnostic = format!(
                "Iteration cap reached: {} model/tool round-trips in one turn. \
                 Stopping to avoid a loop.",
                MAX_ITERATIONS_PER_TURN
            );
            self.fail_all(calls, &diagnostic);
            return;
        }

        if calls.len() > MAX_TOOL_CALLS_PER_ITERATION {
            let diagnostic = format!(
                "Tool-call cap exceeded: {} calls requested in one iteration (limit {}).",
                calls.len(),
                MAX_TOOL_CALLS_PER_ITERATION
            );
            self.fail_all(calls, &diagnostic);
            return;
        }

        self.iterations += 1;
        self.queue = calls.into();
        self.state = MachineState::EvaluatingPolicy;
    }

    fn fail_all(&mut self, calls: Vec<ToolCall>, diagnostic: &str) {
        for call in calls {
            let result = ToolResult::error(ErrorKind::InternalError, diagnostic);
            self.results.push((call, result));
        }
        self.violation = Some(diagnostic.to_string());
        self.state = MachineState::Completed;
    }

    /// Reports the user's answer to the last permission prompt.
    pub fn resolve_permission(&mut self, response: PromptResponse) {
        self.pending_response = Some(response);
    }

    /// Advances the machine by one bounded step.
    pub async fn tick(&mut self, deps: &mut MachineDeps<'_>) -> TickAction {
        if self.state == MachineState::Completed {
            return self.complete();
        }

        // Pull the next queued call.
        if self.current.is_none() {
            match self.queue.pop_front() {
                Some(call) => {
                    self.current = Some(call);
                    self.state = MachineState::EvaluatingPolicy;
                }
                None => {
                    self.state = MachineState::Completed;
                    return self.complete();
                }
            }
        }

        let call = self.current.clone().expect("set above");

        match self.state {
            MachineState::EvaluatingPolicy => {
                // Unknown tools skip straight to execution, which reports
                // not_found as data.
                let Some(risk) = deps.registry.risk_of(&call.name) else {
                    return self.execute_current(deps, call).await;
                };

                match deps.permissions.evaluate(&call.name, risk, &call.arguments) {
                    Decision::Allow => self.execute_current(deps, call).await,
                    Decision::Deny => self.finish_current(call.clone(), denied_result(&call.name)),
                    Decision::AskUser => {
                        self.state = MachineState::AwaitingPermission;
                        TickAction::ShowPermissionPrompt {
                            tool_name: call.name.clone(),
                            arguments: call.arguments.clone(),
                            risk,
                        }
                    }
                }
            }
            MachineState::AwaitingPermission => {
                let Some(response) = self.pending_response.take() else {
                    // Host ticked again without resolving; re-issue the
                    // prompt.
                    let risk = deps.registry.risk_of(&call.name).unwrap_or(RiskLevel::High);
                    return TickAction::ShowPermissionPrompt {
                        tool_name: call.name.clone(),
                        arguments: call.arguments.clone(),
                        risk,
                    };
                };

                let allowed =
                    deps.permissions
                        .record_response(&call.name, &call.arguments, response);
                if allowed {
                    self.execute_current(deps, call).await
                } else {
                    self.finish_current(call.clone(), denied_result(&call.name))
                }
            }
            // Idle/Executing are transient inside a tick; reaching them here
            // means the queue pull above will reorient the machine.
            _ => {
                self.state = MachineState::EvaluatingPolicy;
                TickAction::RenderRequested {
                    line: String::new(),
                }
            }
        }
    }

    async fn execute_current(&mut self, deps: &mut MachineDeps<'_>, call: ToolCall) -> TickAction {
        self.state = MachineState::Executing;

        let mut ctx = ToolContext {
            config: deps.config,
            tracker: &mut *deps.tracker,
            tasks: &mut *deps.tasks,
            workdir: deps.workdir,
            conversation: deps.conversation,
            provider: deps.provider,
        };
        let result = deps
            .registry
            .execute(&call.name, call.arguments.clone(), &mut ctx)
            .await;

        self.finish_current(call, result)
    }

    fn finish_current(&mut self, call: ToolCall, result: ToolResult) -> TickAction {
        let line = if result.success {
            format!(
                "{} ok ({} ms)",
                call.name, result.metadata.execution_ms
            )
        } else {
            format!(
                "{} failed: {}",
                call.name,
                result.error_message.as_deref().unwrap_or("error")
            )
        };

        self.results.push((call, result));
        self.current = None;
        self.state = if self.queue.is_empty() {
            MachineState::Completed
        } else {
            MachineState::EvaluatingPolicy
        };

        TickAction::RenderRequested { line }
    }

    fn complete(&mut self) -> TickAction {
        let results = std::mem::take(&mut self.results);
        let diagnostic = self.violation.take();
        let should_continue = diagnostic.is_none();
        self.state = MachineState::Idle;
        self.current = None;

        TickAction::IterationComplete {
            results,
            should_continue,
            diagnostic,
        }
    }
}
