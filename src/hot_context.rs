//! Hot-context injector.
//!
//! Builds a short system-message snapshot of the current work state,
//! occupying message index 1 of every outbound request. The content is
//! synthesized from tracker state immediately before each send.
//!
//! This function MUST NOT touch the filesystem. Staleness display uses the
//! tracker's timestamps only; deep hash comparison belongs to tools calling
//! `has_file_changed_deep` explicitly.

use crate::tasks::TaskList;
use crate::tracker::{ContextTracker, ReadKind};
use crate::types::Message;
use std::path::PathBuf;

/// Max files and modifications listed in the snapshot.
const MAX_FILES: usize = 5;
const MAX_MODIFICATIONS: usize = 5;

/// Messages scanned for file mentions.
const MENTION_WINDOW: usize = 5;

const SUMMARY_TRUNCATE: usize = 60;

fn format_age(now_ms: u64, then_ms: u64) -> String {
    let delta_s = now_ms.saturating_sub(then_ms) / 1000;
    if delta_s < 60 {
        "just now".to_string()
    } else if delta_s < 3600 {
        format!("{} min ago", delta_s / 60)
    } else {
        format!("{} h ago", delta_s / 3600)
    }
}

/// Builds the snapshot. Returns an empty string when there is nothing to
/// report; the caller then injects nothing.
pub fn build(tracker: &ContextTracker, tasks: &TaskList, messages: &[Message]) -> String {
    let now = crate::now_unix_ms();
    let mut sections: Vec<String> = Vec::new();

    // 1. Active task and the files touched under it.
    if let Some(task) = tasks.active() {
        let mut block = format!("Active task: {} ({})", task.content, task.id);
        if !tracker.todo.files_touched.is_empty() {
            let touched: Vec<String> = tracker
                .todo
                .files_touched
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            block.push_str(&format!("\n  touched: {}", touched.join(", ")));
        }
        sections.push(block);
    }

    // 2. Active context files: mentioned recently OR touched under the
    // task. Ascending path order keeps the snapshot stable across turns,
    // which keeps the provider's KV cache warm.
    let mention_start = messages.len().saturating_sub(MENTION_WINDOW);
    let recent_messages = &messages[mention_start..];

    let mut active_files: Vec<&PathBuf> = tracker
        .read_paths()
        .filter(|path| {
            if tracker.todo.files_touched.contains(*path) {
                return true;
            }
            // Tracked paths are resolved; a mention by bare file name
            // counts too.
            let shown = path.display().to_string();
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(shown.as_str());
            recent_messages
                .iter()
                .any(|m| m.content.contains(&shown) || m.content.contains(name))
        })
        .collect();
    active_files.sort();
    active_files.truncate(MAX_FILES);

    if !active_files.is_empty() {
        let mut block = String::from("Active files:");
        for path in active_files {
            let tracked = tracker.tracked(path).expect("path came from read_paths");
            let detail = match tracked.last_read_kind {
                ReadKind::Full => "full".to_string(),
                ReadKind::Curated => {
                    let sections = tracked
                        .curated
                        .as_ref()
                        .map(|c| c.line_ranges.len())
                        .unwrap_or(0);
                    format!("curated, {} sections", sections)
                }
                ReadKind::Lines => match tracked.last_line_range {
                    Some(range) => format!("lines {}-{}", range.start, range.end),
                    None => "lines".to_string(),
                },
            };
            // Stored-timestamp staleness only; no disk access here.
            let stale = if tracker.has_file_changed_cheap(path) {
                " [modified since read]"
            } else {
                ""
            };
            block.push_str(&format!("\n  {} ({}){}", path.display(), detail, stale));
        }
        sections.push(block);
    }

    // 3. Recent modifications, newest first.
    let modifications: Vec<String> = tracker
        .recent_modifications()
        .take(MAX_MODIFICATIONS)
        .map(|m| {
            let mut line = format!(
                "  {} {} ({})",
                m.kind.as_str(),
                m.path.display(),
                format_age(now, m.unix_ms)
            );
            if let Some(summary) = &m.summary {
                let mut summary = summary.clone();
                if summary.len() > SUMMARY_TRUNCATE {
                    summary.truncate(SUMMARY_TRUNCATE);
                }
                line.push_str(&format!(" - {}", summary));
            }
            line
        })
        .collect();
    if !modifications.is_empty() {
        sections.push(format!("Recent changes:\n{}", modifications.join("\n")));
    }

    // 4. Task counters.
    let counts = tasks.counts();
    if counts.in_progress + counts.pending + counts.completed > 0 {
        sections.push(format!(
            "Tasks: {} in progress, {} pending, {} completed",
            counts.in_progress, counts.pending, counts.completed
        ));
    }

    sections.join("\n\n")
}
