//! Tool registry and executors.
//!
//! Each tool declares a [`ToolSpec`] (name, description, JSON schema, risk
//! level) and implements [`ToolExecutor`]. The registry dispatches
//! model-issued calls to executors, validating required arguments first and
//! mapping every failure into a structured [`ToolResult`]: tool failures
//! are data for the model, never loop aborts.

pub mod compress;
pub mod fs;
pub mod tasks;

use crate::config::Config;
use crate::permissions::RiskLevel;
use crate::provider::ChatProvider;
use crate::tasks::TaskList;
use crate::tracker::ContextTracker;
use crate::types::{ErrorKind, Message, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::time::Instant;

/// Static description of a tool, contributed to the `tools` array of every
/// chat request.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// Full JSON Schema: `{"type":"object","properties":{...},"required":[...]}`.
    pub schema: Value,
    pub risk: RiskLevel,
}

impl ToolSpec {
    /// OpenAI `function` entry for the request's `tools` array.
    pub fn to_openai_format(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.schema,
            }
        })
    }
}

/// Execution context handed to every tool for the duration of one call.
///
/// Tools must not retain any of these references past their return; the
/// lifetimes make that a compile error.
pub struct ToolContext<'a> {
    pub config: &'a Config,
    pub tracker: &'a mut ContextTracker,
    pub tasks: &'a mut TaskList,
    /// Workspace root all relative tool paths resolve against.
    pub workdir: &'a Path,
    /// Read-only view of the conversation (curator cache keying).
    pub conversation: &'a [Message],
    /// LLM access for sub-agents; absent in contexts that must not recurse.
    pub provider: Option<&'a dyn ChatProvider>,
}

impl ToolContext<'_> {
    /// Resolves a tool-supplied path against the workspace root.
    pub fn resolve(&self, path: &str) -> std::path::PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.workdir.join(p)
        }
    }
}

/// A strongly-typed tool handler.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    async fn execute(&self, args: Value, ctx: &mut ToolContext<'_>) -> ToolResult;
}

/// Name-indexed tool dispatch.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The baseline tool set offered to the model.
    pub fn with_baseline() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(fs::GetFileTree::new()));
        registry.register(Box::new(fs::ReadFile::new()));
        registry.register(Box::new(fs::ReadLines::new()));
        registry.register(Box::new(fs::WriteFile::new()));
        registry.register(Box::new(fs::InsertLines::new()));
        registry.register(Box::new(fs::ReplaceLines::new()));
        registry.register(Box::new(tasks::AddTask::new()));
        registry.register(Box::new(tasks::ListTasks::new()));
        registry.register(Box::new(tasks::UpdateTask::new()));
        registry.register(Box::new(tasks::GetCurrentTime::new()));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn ToolExecutor>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ToolExecutor> {
        self.tools
            .iter()
            .find(|t| t.spec().name == name)
            .map(|t| t.as_ref())
    }

    pub fn risk_of(&self, name: &str) -> Option<RiskLevel> {
        self.get(name).map(|t| t.spec().risk)
    }

    /// Schemas for the chat request's `tools` array.
    pub fn schemas(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.spec().to_openai_format()).collect()
    }

    /// Validates and executes a call, stamping execution metadata.
    ///
    /// Unknown tool → `not_found`; missing required arguments →
    /// `validation_failed`. Both come back as results, not errors.
    pub async fn execute(&self, name: &str, args: Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::error(ErrorKind::NotFound, format!("unknown tool '{}'", name));
        };

        if let Err(message) = validate_args(tool.spec(), &args) {
            return ToolResult::error(ErrorKind::ValidationFailed, message);
        }

        let start = Instant::now();
        let result = tool.execute(args, ctx).await;
        result.with_execution_ms(start.elapsed().as_millis() as u64)
    }
}

/// Checks arguments against the schema's `required` list. Unknown extra
/// fields are tolerated; models pad arguments freely.
fn validate_args(spec: &ToolSpec, args: &Value) -> std::result::Result<(), String> {
    let Some(required) = spec.schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };
    if required.is_empty() {
        return Ok(());
    }

    let Some(object) = args.as_object() else {
        return Err(format!("'{}' arguments must be a JSON object", spec.name));
    };

    for field in required {
        if let Some(field) = field.as_str() {
            if !object.contains_key(field) {
                return Err(format!(
                    "'{}' missing required argument '{}'",
                    spec.name, field
                ));
            }
        }
    }

    Ok(())
}

/// Shared helper: pull a string argument.
pub(crate) fn arg_str<'v>(args: &'v Value, key: &str) -> Option<&'v str> {
    args.get(key).and_then(Value::as_str)
}

/// Shared helper: pull a positive integer argument.
pub(crate) fn arg_usize(args: &Value, key: &str) -> Option<usize> {
    args.get(key).and_then(Value::as_u64).map(|v| v as usize)
}
