//! Filesystem tools: tree walk, reads (with curation), and line-based edits.
//!
//! Every mutation goes through the tracker so the hot-context injector and
//! the compression engine can cite it later. Read errors map to the
//! `ToolResult` taxonomy (a missing file is `not_found`, a directory where
//! a file was expected is `io_error`) and never abort the loop.

use crate::curator;
use crate::permissions::RiskLevel;
use crate::tools::{ToolContext, ToolExecutor, ToolSpec, arg_str, arg_usize};
use crate::tracker::{self, FunctionInfo, LineRange, ModificationKind, ReadKind};
use crate::types::{ErrorKind, ToolResult};
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;

/// Depth bound for the directory walk.
const TREE_MAX_DEPTH: usize = 6;

fn read_error(path: &Path, err: std::io::Error) -> ToolResult {
    let kind = match err.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::NotFound,
        _ => ErrorKind::IoError,
    };
    ToolResult::error(kind, format!("{}: {}", path.display(), err))
}

/// Prefixes 1-based line numbers, `%5d | `.
pub(crate) fn number_lines(content: &str, first_line: usize) -> String {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| format!("{:5} | {}", first_line + i, line))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// get_file_tree
// ---------------------------------------------------------------------------

pub struct GetFileTree {
    spec: ToolSpec,
}

impl GetFileTree {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec {
                name: "get_file_tree",
                description: "List files and directories under a path (depth-bounded, dotfiles skipped).",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Directory to walk; defaults to the workspace root"}
                    },
                    "required": []
                }),
                risk: RiskLevel::Safe,
            },
        }
    }
}

fn walk(dir: &Path, prefix: &Path, depth: usize, out: &mut Vec<String>) -> std::io::Result<()> {
    if depth > TREE_MAX_DEPTH {
        return Ok(());
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.starts_with('.'))
                .unwrap_or(false)
        })
        .collect();
    entries.sort();

    for path in entries {
        let rel = path.strip_prefix(prefix).unwrap_or(&path);
        if path.is_dir() {
            out.push(format!("{}/", rel.display()));
            walk(&path, prefix, depth + 1, out)?;
        } else {
            out.push(rel.display().to_string());
        }
    }
    Ok(())
}

#[async_trait]
impl ToolExecutor for GetFileTree {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: serde_json::Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        let root = match arg_str(&args, "path") {
            Some(p) => ctx.resolve(p),
            None => ctx.workdir.to_path_buf(),
        };

        let mut listing = Vec::new();
        if let Err(e) = walk(&root, &root, 0, &mut listing) {
            return read_error(&root, e);
        }
        ToolResult::ok(listing.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

pub struct ReadFile {
    spec: ToolSpec,
}

impl ReadFile {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec {
                name: "read_file",
                description: "Read a file. Large files are filtered down to the line ranges relevant to the current conversation.",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "File path relative to the workspace root"}
                    },
                    "required": ["path"]
                }),
                risk: RiskLevel::Medium,
            },
        }
    }
}

/// Lightweight structure scan feeding the relationship index. Not
/// load-bearing: misses are fine, the index only enriches hot context.
fn scan_structure(path: &Path, content: &str, ctx: &mut ToolContext<'_>) {
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("mod ") {
            if let Some(name) = rest.strip_suffix(';') {
                if let Some(parent) = path.parent() {
                    let target = parent.join(format!("{}.rs", name.trim()));
                    ctx.tracker.relationships.record_import(path, &target);
                }
            }
        }
        if let Some(rest) = trimmed
            .strip_prefix("pub fn ")
            .or_else(|| trimmed.strip_prefix("fn "))
        {
            if let Some(name) = rest.split('(').next() {
                ctx.tracker.relationships.record_function(
                    path,
                    FunctionInfo {
                        name: name.trim().to_string(),
                        line: i + 1,
                    },
                );
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for ReadFile {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: serde_json::Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        let path = ctx.resolve(arg_str(&args, "path").unwrap_or_default().trim());

        if path.is_dir() {
            return ToolResult::error(
                ErrorKind::IoError,
                format!("{} is a directory", path.display()),
            );
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => return read_error(&path, e),
        };
        let total_lines = content.lines().count();

        scan_structure(&path, &content, ctx);

        // Small files bypass the curator entirely.
        let threshold = ctx.config.file_read_small_threshold;
        if total_lines <= threshold || ctx.provider.is_none() {
            ctx.tracker
                .record_read(&path, content.as_bytes(), ReadKind::Full, None);
            return ToolResult::ok(number_lines(&content, 1));
        }

        let content_hash = tracker::content_hash(content.as_bytes());
        let conversation_hash = tracker::conversation_hash(ctx.conversation);

        // Cache hit requires BOTH hashes to match; 50-100x cheaper than
        // re-invoking the sub-agent.
        if let Some(cache) = ctx.tracker.cached_curation(&path, content_hash, conversation_hash) {
            let excerpt = curator::render_excerpt(&path, &content, total_lines, cache);
            ctx.tracker
                .record_read(&path, content.as_bytes(), ReadKind::Curated, None);
            log::debug!(target: "context", "curator cache HIT for {}", path.display());
            return ToolResult::ok(excerpt);
        }

        let provider = ctx.provider.expect("checked above");
        match curator::run(
            provider,
            ctx.config,
            &path,
            &content,
            total_lines,
            ctx.conversation,
        )
        .await
        {
            Ok(curation) => {
                ctx.tracker
                    .record_read(&path, content.as_bytes(), ReadKind::Curated, None);
                let cache = tracker::CurationCache {
                    conversation_hash,
                    line_ranges: curation.line_ranges,
                    summary: curation.summary,
                    unix_ms: crate::now_unix_ms(),
                };
                let excerpt = curator::render_excerpt(&path, &content, total_lines, &cache);
                ctx.tracker.store_curation(&path, cache);
                ToolResult::ok(excerpt)
            }
            Err(e) => {
                // Degrade to something useful, never fail the read.
                log::warn!("curator failed for {}: {}, returning full file", path.display(), e);
                ctx.tracker
                    .record_read(&path, content.as_bytes(), ReadKind::Full, None);
                ToolResult::ok(number_lines(&content, 1))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// read_lines
// ---------------------------------------------------------------------------

pub struct ReadLines {
    spec: ToolSpec,
}

impl ReadLines {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec {
                name: "read_lines",
                description: "Read an inclusive 1-based line range from a file.",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "start": {"type": "integer", "description": "First line, 1-based"},
                        "end": {"type": "integer", "description": "Last line, inclusive"}
                    },
                    "required": ["path", "start", "end"]
                }),
                risk: RiskLevel::Medium,
            },
        }
    }
}

#[async_trait]
impl ToolExecutor for ReadLines {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: serde_json::Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        let path = ctx.resolve(arg_str(&args, "path").unwrap_or_default().trim());
        let (Some(start), Some(end)) = (arg_usize(&args, "start"), arg_usize(&args, "end")) else {
            return ToolResult::error(
                ErrorKind::ValidationFailed,
                "start and end must be positive integers",
            );
        };

        if start == 0 || end < start {
            return ToolResult::error(
                ErrorKind::ValidationFailed,
                format!("invalid line range {}-{}", start, end),
            );
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => return read_error(&path, e),
        };
        let lines: Vec<&str> = content.lines().collect();
        if start > lines.len() {
            return ToolResult::error(
                ErrorKind::ValidationFailed,
                format!("start {} is past end of file ({} lines)", start, lines.len()),
            );
        }
        let end = end.min(lines.len());

        let slice = lines[start - 1..end].join("\n");
        ctx.tracker.record_read(
            &path,
            content.as_bytes(),
            ReadKind::Lines,
            Some(LineRange { start, end }),
        );

        ToolResult::ok(number_lines(&slice, start))
    }
}

// ---------------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------------

pub struct WriteFile {
    spec: ToolSpec,
}

impl WriteFile {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec {
                name: "write_file",
                description: "Create or overwrite a file with the given content.",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "content": {"type": "string"}
                    },
                    "required": ["path", "content"]
                }),
                risk: RiskLevel::High,
            },
        }
    }
}

#[async_trait]
impl ToolExecutor for WriteFile {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: serde_json::Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        let path = ctx.resolve(arg_str(&args, "path").unwrap_or_default().trim());
        let content = arg_str(&args, "content").unwrap_or_default();

        let existed = path.exists();
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return read_error(parent, e);
            }
        }
        if let Err(e) = std::fs::write(&path, content) {
            return read_error(&path, e);
        }

        let kind = if existed {
            ModificationKind::Modified
        } else {
            ModificationKind::Created
        };
        ctx.tracker.record_modification(
            &path,
            kind,
            Some(format!("wrote {} bytes", content.len())),
        );

        ToolResult::ok(format!(
            "{} {} ({} bytes)",
            kind.as_str(),
            path.display(),
            content.len()
        ))
    }
}

// ---------------------------------------------------------------------------
// insert_lines / replace_lines
// ---------------------------------------------------------------------------

pub struct InsertLines {
    spec: ToolSpec,
}

impl InsertLines {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec {
                name: "insert_lines",
                description: "Insert content so that it begins at the given 1-based line number.",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "line": {"type": "integer", "description": "Insertion point, 1-based; line_count+1 appends"},
                        "content": {"type": "string"}
                    },
                    "required": ["path", "line", "content"]
                }),
                risk: RiskLevel::High,
            },
        }
    }
}

#[async_trait]
impl ToolExecutor for InsertLines {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: serde_json::Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        let path = ctx.resolve(arg_str(&args, "path").unwrap_or_default().trim());
        let Some(line) = arg_usize(&args, "line") else {
            return ToolResult::error(ErrorKind::ValidationFailed, "line must be a positive integer");
        };
        let content = arg_str(&args, "content").unwrap_or_default();

        let existing = match std::fs::read_to_string(&path) {
            Ok(existing) => existing,
            Err(e) => return read_error(&path, e),
        };
        let mut lines: Vec<&str> = existing.lines().collect();

        if line == 0 || line > lines.len() + 1 {
            return ToolResult::error(
                ErrorKind::ValidationFailed,
                format!("line {} out of range (file has {} lines)", line, lines.len()),
            );
        }

        let inserted: Vec<&str> = content.lines().collect();
        let count = inserted.len();
        lines.splice(line - 1..line - 1, inserted);

        if let Err(e) = std::fs::write(&path, lines.join("\n") + "\n") {
            return read_error(&path, e);
        }
        ctx.tracker.record_modification(
            &path,
            ModificationKind::Modified,
            Some(format!("inserted {} lines at {}", count, line)),
        );

        ToolResult::ok(format!("inserted {} lines at line {}", count, line))
    }
}

pub struct ReplaceLines {
    spec: ToolSpec,
}

impl ReplaceLines {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec {
                name: "replace_lines",
                description: "Replace an inclusive 1-based line range with new content.",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "start": {"type": "integer"},
                        "end": {"type": "integer"},
                        "content": {"type": "string"}
                    },
                    "required": ["path", "start", "end", "content"]
                }),
                risk: RiskLevel::High,
            },
        }
    }
}

#[async_trait]
impl ToolExecutor for ReplaceLines {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: serde_json::Value, ctx: &mut ToolContext<'_>) -> ToolResult {
        let path = ctx.resolve(arg_str(&args, "path").unwrap_or_default().trim());
        let (Some(start), Some(end)) = (arg_usize(&args, "start"), arg_usize(&args, "end")) else {
            return ToolResult::error(
                ErrorKind::ValidationFailed,
                "start and end must be positive integers",
            );
        };
        let content = arg_str(&args, "content").unwrap_or_default();

        let existing = match std::fs::read_to_string(&path) {
            Ok(existing) => existing,
            Err(e) => return read_error(&path, e),
        };
        let mut lines: Vec<&str> = existing.lines().collect();

        if start == 0 || end < start || end > lines.len() {
            return ToolResult::error(
                ErrorKind::ValidationFailed,
                format!(
                    "invalid range {}-{} (file has {} lines)",
                    start,
                    end,
                    lines.len()
                ),
            );
        }

        let replacement: Vec<&str> = content.lines().collect();
        let replaced = end - start + 1;
        lines.splice(start - 1..end, replacement);

        if let Err(e) = std::fs::write(&path, lines.join("\n") + "\n") {
            return read_error(&path, e);
        }
        ctx.tracker.record_modification(
            &path,
            ModificationKind::Modified,
            Some(format!("replaced lines {}-{}", start, end)),
        );

        ToolResult::ok(format!(
            "replaced {} lines ({}-{}) with {} lines",
            replaced,
            start,
            end,
            content.lines().count()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::ContextFixture;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_file_tree_sorted_and_skips_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();

        let mut fixture = ContextFixture::new(dir.path());
        let mut ctx = fixture.ctx();
        let result = GetFileTree::new().execute(json!({}), &mut ctx).await;

        let data = result.data.unwrap();
        assert_eq!(data, "Cargo.toml\nsrc/\nsrc/lib.rs");
    }

    #[tokio::test]
    async fn test_read_file_small_full_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}\n").unwrap();

        let mut fixture = ContextFixture::new(dir.path());
        let mut ctx = fixture.ctx();
        let result = ReadFile::new().execute(json!({"path": "a.rs"}), &mut ctx).await;

        assert!(result.success);
        assert_eq!(result.data.unwrap(), "    1 | fn main() {}");
        assert!(fixture.tracker.tracked(&dir.path().join("a.rs")).is_some());
    }

    #[tokio::test]
    async fn test_read_file_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut fixture = ContextFixture::new(dir.path());
        let mut ctx = fixture.ctx();

        let result = ReadFile::new().execute(json!({"path": "nope.rs"}), &mut ctx).await;
        assert_eq!(result.error_kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_read_file_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut fixture = ContextFixture::new(dir.path());
        let mut ctx = fixture.ctx();

        let result = ReadFile::new().execute(json!({"path": "sub"}), &mut ctx).await;
        assert_eq!(result.error_kind, ErrorKind::IoError);
    }

    #[tokio::test]
    async fn test_read_file_records_function_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("m.rs"),
            "pub fn alpha() {}\nfn beta(x: u32) -> u32 { x }\n",
        )
        .unwrap();

        let mut fixture = ContextFixture::new(dir.path());
        let mut ctx = fixture.ctx();
        ReadFile::new().execute(json!({"path": "m.rs"}), &mut ctx).await;

        let funcs = fixture
            .tracker
            .relationships
            .functions_of(&dir.path().join("m.rs"));
        assert_eq!(funcs.len(), 2);
        assert_eq!(funcs[0].name, "alpha");
        assert_eq!(funcs[1].line, 2);
    }

    #[tokio::test]
    async fn test_read_lines_range_and_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("n.txt");
        std::fs::write(&path, "one\ntwo\nthree\nfour\n").unwrap();

        let mut fixture = ContextFixture::new(dir.path());
        let mut ctx = fixture.ctx();
        let result = ReadLines::new()
            .execute(json!({"path": "n.txt", "start": 2, "end": 3}), &mut ctx)
            .await;

        assert_eq!(result.data.unwrap(), "    2 | two\n    3 | three");
        let tracked = fixture.tracker.tracked(&path).unwrap();
        assert_eq!(tracked.last_read_kind, ReadKind::Lines);
        assert_eq!(tracked.last_line_range, Some(LineRange { start: 2, end: 3 }));
    }

    #[tokio::test]
    async fn test_read_lines_rejects_bad_range() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("n.txt"), "one\n").unwrap();

        let mut fixture = ContextFixture::new(dir.path());
        let mut ctx = fixture.ctx();
        let result = ReadLines::new()
            .execute(json!({"path": "n.txt", "start": 5, "end": 9}), &mut ctx)
            .await;

        assert_eq!(result.error_kind, ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn test_write_file_created_then_modified() {
        let dir = tempfile::tempdir().unwrap();
        let mut fixture = ContextFixture::new(dir.path());

        {
            let mut ctx = fixture.ctx();
            let result = WriteFile::new()
                .execute(json!({"path": "new.txt", "content": "hello"}), &mut ctx)
                .await;
            assert!(result.data.unwrap().starts_with("created"));
        }
        {
            let mut ctx = fixture.ctx();
            let result = WriteFile::new()
                .execute(json!({"path": "new.txt", "content": "hello again"}), &mut ctx)
                .await;
            assert!(result.data.unwrap().starts_with("modified"));
        }

        assert_eq!(fixture.tracker.modification_count(), 2);
    }

    #[tokio::test]
    async fn test_insert_lines_at_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "a\nc\n").unwrap();

        let mut fixture = ContextFixture::new(dir.path());
        let mut ctx = fixture.ctx();
        let result = InsertLines::new()
            .execute(json!({"path": "f.txt", "line": 2, "content": "b"}), &mut ctx)
            .await;

        assert!(result.success);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\nc\n");
    }

    #[tokio::test]
    async fn test_replace_lines_inclusive_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "a\nb\nc\nd\n").unwrap();

        let mut fixture = ContextFixture::new(dir.path());
        let mut ctx = fixture.ctx();
        let result = ReplaceLines::new()
            .execute(
                json!({"path": "f.txt", "start": 2, "end": 3, "content": "X\nY\nZ"}),
                &mut ctx,
            )
            .await;

        assert!(result.success);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nX\nY\nZ\nd\n");
    }

    #[tokio::test]
    async fn test_replace_lines_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "a\n").unwrap();

        let mut fixture = ContextFixture::new(dir.path());
        let mut ctx = fixture.ctx();
        let result = ReplaceLines::new()
            .execute(
                json!({"path": "f.txt", "start": 1, "end": 9, "content": "x"}),
                &mut ctx,
            )
            .await;

        assert_eq!(result.error_kind, ErrorKind::ValidationFailed);
    }
}
