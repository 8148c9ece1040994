//! Task management tools and the wall-clock tool.

use crate::permissions::RiskLevel;
use crate::tasks::TaskStatus;
use crate::tools::{ToolContext, ToolExecutor, ToolSpec, arg_str};
use crate::types::{ErrorKind, ToolResult};
use async_trait::async_trait;
use serde_json::json;

pub struct AddTask {
    spec: ToolSpec,
}

impl AddTask {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec {
                name: "add_task",
                description: "Add a task to the session todo list.",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "content": {"type": "string", "description": "What needs to be done"}
                    },
                    "required": ["content"]
                }),
                risk: RiskLevel::Safe,
            },
        }
    }
}

#[async_trait]
impl ToolExecutor for AddTask {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: serde_json::Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        let content = arg_str(&args, "content").unwrap_or_default().trim().to_string();
        if content.is_empty() {
            return ToolResult::error(ErrorKind::ValidationFailed, "task content cannot be empty");
        }
        let task = ctx.tasks.add(content);
        ToolResult::ok(format!("added {}: {}", task.id, task.content))
    }
}

pub struct ListTasks {
    spec: ToolSpec,
}

impl ListTasks {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec {
                name: "list_tasks",
                description: "List all tasks with their status.",
                schema: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
                risk: RiskLevel::Safe,
            },
        }
    }
}

#[async_trait]
impl ToolExecutor for ListTasks {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, _args: serde_json::Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        if ctx.tasks.all().is_empty() {
            return ToolResult::ok("no tasks");
        }
        let listing = ctx
            .tasks
            .all()
            .iter()
            .map(|t| format!("{} [{}] {}", t.id, t.status.as_str(), t.content))
            .collect::<Vec<_>>()
            .join("\n");
        ToolResult::ok(listing)
    }
}

pub struct UpdateTask {
    spec: ToolSpec,
}

impl UpdateTask {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec {
                name: "update_task",
                description: "Update a task's status (pending, in_progress, completed) and/or content.",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "status": {"type": "string", "enum": ["pending", "in_progress", "completed"]},
                        "content": {"type": "string"}
                    },
                    "required": ["id"]
                }),
                risk: RiskLevel::Safe,
            },
        }
    }
}

#[async_trait]
impl ToolExecutor for UpdateTask {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: serde_json::Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        let id = arg_str(&args, "id").unwrap_or_default().to_string();

        let status = match arg_str(&args, "status") {
            Some(raw) => match TaskStatus::parse(raw) {
                Some(status) => Some(status),
                None => {
                    return ToolResult::error(
                        ErrorKind::ValidationFailed,
                        format!("unknown status '{}'", raw),
                    );
                }
            },
            None => None,
        };
        let content = arg_str(&args, "content").map(str::to_string);

        match ctx.tasks.update(&id, status, content) {
            Ok(task) => {
                // The tracker mirrors the active task for hot context and
                // modification attribution.
                match task.status {
                    TaskStatus::InProgress => {
                        ctx.tracker.todo.active_task_id = Some(task.id.clone());
                        ctx.tracker.todo.started_unix_ms = crate::now_unix_ms();
                    }
                    _ if ctx.tracker.todo.active_task_id.as_deref() == Some(task.id.as_str()) => {
                        ctx.tracker.todo.active_task_id = None;
                    }
                    _ => {}
                }
                ToolResult::ok(format!("{} [{}] {}", task.id, task.status.as_str(), task.content))
            }
            Err(e) => ToolResult::error(ErrorKind::NotFound, e.to_string()),
        }
    }
}

pub struct GetCurrentTime {
    spec: ToolSpec,
}

impl GetCurrentTime {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec {
                name: "get_current_time",
                description: "Get the current wall-clock time (ISO-8601).",
                schema: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
                risk: RiskLevel::Safe,
            },
        }
    }
}

#[async_trait]
impl ToolExecutor for GetCurrentTime {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, _args: serde_json::Value, _ctx: &mut ToolContext<'_>) -> ToolResult {
        ToolResult::ok(chrono::Local::now().to_rfc3339())
    }
}
