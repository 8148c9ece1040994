//! Session task (todo) list.
//!
//! Invariant: at most one task is `InProgress` at any time. Promoting a task
//! demotes the previous one back to `Pending`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub content: String,
    pub status: TaskStatus,
}

/// Counters surfaced in the hot-context snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub in_progress: usize,
    pub pending: usize,
    pub completed: usize,
}

#[derive(Debug, Default)]
pub struct TaskList {
    tasks: Vec<Task>,
    next_id: u64,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pending task and returns it.
    pub fn add(&mut self, content: impl Into<String>) -> &Task {
        self.next_id += 1;
        self.tasks.push(Task {
            id: format!("task_{}", self.next_id),
            content: content.into(),
            status: TaskStatus::Pending,
        });
        self.tasks.last().expect("just pushed")
    }

    pub fn all(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// The single in-progress task, if any.
    pub fn active(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.status == TaskStatus::InProgress)
    }

    /// Updates status and/or content. Setting `InProgress` demotes any other
    /// in-progress task to `Pending`, preserving the invariant.
    pub fn update(
        &mut self,
        id: &str,
        status: Option<TaskStatus>,
        content: Option<String>,
    ) -> Result<&Task> {
        if !self.tasks.iter().any(|t| t.id == id) {
            return Err(Error::invalid_input(format!("no task with id '{}'", id)));
        }

        if status == Some(TaskStatus::InProgress) {
            for task in self.tasks.iter_mut() {
                if task.status == TaskStatus::InProgress && task.id != id {
                    task.status = TaskStatus::Pending;
                }
            }
        }

        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .expect("checked above");
        if let Some(status) = status {
            task.status = status;
        }
        if let Some(content) = content {
            task.content = content;
        }
        Ok(task)
    }

    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
            }
        }
        counts
    }
}
