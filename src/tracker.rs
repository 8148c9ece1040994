//! Session context tracker: file reads, modifications, curator cache,
//! import relationships, and the conversation hash.
//!
//! Created at session start, dropped at exit; nothing here persists. The
//! tracker is mutated only on the main task, through the tool execution
//! context.
//!
//! # Cache validity
//!
//! A curator cache entry is valid iff the file's content hash is unchanged
//! AND the conversation hash matches the current turn. Either drifting
//! invalidates the entry on the next read attempt.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::types::Message;

/// Bounded length of the recent-modification record.
pub const MODIFICATION_CAP: usize = 20;

/// Number of trailing messages folded into the conversation hash.
pub const CONVERSATION_HASH_WINDOW: usize = 5;

/// 64-bit non-cryptographic fingerprint of file contents.
///
/// Collision-best-effort for cache keys; explicitly not a security boundary.
pub fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// 64-bit fingerprint of the last [`CONVERSATION_HASH_WINDOW`] messages of
/// any role, used as the curator cache key.
pub fn conversation_hash(messages: &[Message]) -> u64 {
    let mut hasher = DefaultHasher::new();
    let start = messages.len().saturating_sub(CONVERSATION_HASH_WINDOW);
    for msg in &messages[start..] {
        msg.content.hash(&mut hasher);
    }
    hasher.finish()
}

/// How a tracked file was last read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    Full,
    Curated,
    Lines,
}

/// Inclusive 1-based line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

/// One curated line range with the curator's reason for keeping it.
#[derive(Debug, Clone)]
pub struct CuratedRange {
    pub start: usize,
    pub end: usize,
    pub reason: String,
}

/// Cached output of the file-curator sub-agent.
#[derive(Debug, Clone)]
pub struct CurationCache {
    pub conversation_hash: u64,
    pub line_ranges: Vec<CuratedRange>,
    pub summary: String,
    pub unix_ms: u64,
}

/// Per-file tracking state.
#[derive(Debug, Clone)]
pub struct FileTracker {
    pub content_hash: u64,
    pub last_read_unix_ms: u64,
    pub last_read_kind: ReadKind,
    pub last_line_range: Option<LineRange>,
    pub curated: Option<CurationCache>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationKind {
    Created,
    Modified,
    Deleted,
}

impl ModificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModificationKind::Created => "created",
            ModificationKind::Modified => "modified",
            ModificationKind::Deleted => "deleted",
        }
    }
}

/// One entry of the bounded modification record.
#[derive(Debug, Clone)]
pub struct Modification {
    pub path: PathBuf,
    pub kind: ModificationKind,
    pub unix_ms: u64,
    pub related_task_id: Option<String>,
    pub summary: Option<String>,
}

/// Work-in-progress context: the active task and the files touched under it.
#[derive(Debug, Default)]
pub struct TodoContext {
    pub active_task_id: Option<String>,
    pub files_touched: BTreeSet<PathBuf>,
    pub started_unix_ms: u64,
}

/// Function signature info captured opportunistically during reads.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: String,
    pub line: usize,
}

/// Import graph as two symmetric multimaps keyed by owned paths.
/// No back-pointers, no cycles to manage.
#[derive(Debug, Default)]
pub struct FileRelationships {
    imports: HashMap<PathBuf, Vec<PathBuf>>,
    imported_by: HashMap<PathBuf, Vec<PathBuf>>,
    functions: HashMap<PathBuf, Vec<FunctionInfo>>,
}

impl FileRelationships {
    pub fn record_import(&mut self, from: &Path, to: &Path) {
        let entry = self.imports.entry(from.to_path_buf()).or_default();
        if !entry.iter().any(|p| p == to) {
            entry.push(to.to_path_buf());
        }
        let reverse = self.imported_by.entry(to.to_path_buf()).or_default();
        if !reverse.iter().any(|p| p == from) {
            reverse.push(from.to_path_buf());
        }
    }

    pub fn record_function(&mut self, path: &Path, info: FunctionInfo) {
        self.functions.entry(path.to_path_buf()).or_default().push(info);
    }

    pub fn imports_of(&self, path: &Path) -> &[PathBuf] {
        self.imports.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn importers_of(&self, path: &Path) -> &[PathBuf] {
        self.imported_by.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn functions_of(&self, path: &Path) -> &[FunctionInfo] {
        self.functions.get(path).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Session-scoped tracking of everything the assistant has seen and done to
/// the workspace.
#[derive(Debug, Default)]
pub struct ContextTracker {
    read_files: HashMap<PathBuf, FileTracker>,
    recent_modifications: VecDeque<Modification>,
    pub todo: TodoContext,
    pub relationships: FileRelationships,
}

impl ContextTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a read. An existing entry keeps its curator cache unless the
    /// content hash changed, in which case the cache is dropped.
    pub fn record_read(
        &mut self,
        path: &Path,
        content: &[u8],
        kind: ReadKind,
        line_range: Option<LineRange>,
    ) -> u64 {
        let hash = content_hash(content);
        let now = crate::now_unix_ms();

        match self.read_files.get_mut(path) {
            Some(existing) => {
                if existing.content_hash != hash {
                    log::debug!(
                        target: "context",
                        "content changed for {}, dropping curator cache",
                        path.display()
                    );
                    existing.curated = None;
                    existing.content_hash = hash;
                }
                existing.last_read_unix_ms = now;
                existing.last_read_kind = kind;
                existing.last_line_range = line_range;
            }
            None => {
                self.read_files.insert(
                    path.to_path_buf(),
                    FileTracker {
                        content_hash: hash,
                        last_read_unix_ms: now,
                        last_read_kind: kind,
                        last_line_range: line_range,
                        curated: None,
                    },
                );
            }
        }

        hash
    }

    /// Records a mutation: appends to the bounded modification ring,
    /// invalidates any curator cache, and marks the file against the active
    /// task.
    pub fn record_modification(
        &mut self,
        path: &Path,
        kind: ModificationKind,
        summary: Option<String>,
    ) {
        if self.recent_modifications.len() >= MODIFICATION_CAP {
            self.recent_modifications.pop_front();
        }
        self.recent_modifications.push_back(Modification {
            path: path.to_path_buf(),
            kind,
            unix_ms: crate::now_unix_ms(),
            related_task_id: self.todo.active_task_id.clone(),
            summary,
        });

        if let Some(tracked) = self.read_files.get_mut(path) {
            tracked.curated = None;
        }

        if self.todo.active_task_id.is_some() {
            self.todo.files_touched.insert(path.to_path_buf());
        }

        log::debug!(
            target: "context",
            "{} {} ({} modifications tracked)",
            kind.as_str(),
            path.display(),
            self.recent_modifications.len()
        );
    }

    /// Tracked state for a path, if any.
    pub fn tracked(&self, path: &Path) -> Option<&FileTracker> {
        self.read_files.get(path)
    }

    /// Newest-first view of the modification record.
    pub fn recent_modifications(&self) -> impl Iterator<Item = &Modification> {
        self.recent_modifications.iter().rev()
    }

    pub fn modification_count(&self) -> usize {
        self.recent_modifications.len()
    }

    /// Paths currently tracked as read.
    pub fn read_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.read_files.keys()
    }

    /// Cheap staleness check from stored timestamps only: did we record a
    /// modification for this path after its last read? No filesystem access
    /// at all, safe inside the hot-context injector.
    pub fn has_file_changed_cheap(&self, path: &Path) -> bool {
        let Some(tracked) = self.read_files.get(path) else {
            return false;
        };
        self.recent_modifications
            .iter()
            .any(|m| m.path == path && m.unix_ms > tracked.last_read_unix_ms)
    }

    /// Deep staleness check: re-reads the file and compares content hashes.
    /// Costs a full disk read; invoked by tools, never by the injector.
    pub fn has_file_changed_deep(&self, path: &Path) -> bool {
        let Some(tracked) = self.read_files.get(path) else {
            return false;
        };
        match std::fs::read(path) {
            Ok(bytes) => content_hash(&bytes) != tracked.content_hash,
            Err(_) => true,
        }
    }

    /// Stores a curation result against the path's cache slot.
    pub fn store_curation(&mut self, path: &Path, cache: CurationCache) {
        if let Some(tracked) = self.read_files.get_mut(path) {
            tracked.curated = Some(cache);
            tracked.last_read_kind = ReadKind::Curated;
        }
    }

    /// Returns the cached curation iff both the content hash and the
    /// conversation hash still match.
    pub fn cached_curation(
        &self,
        path: &Path,
        current_content_hash: u64,
        current_conversation_hash: u64,
    ) -> Option<&CurationCache> {
        let tracked = self.read_files.get(path)?;
        if tracked.content_hash != current_content_hash {
            return None;
        }
        let cache = tracked.curated.as_ref()?;
        if cache.conversation_hash != current_conversation_hash {
            log::debug!(
                target: "context",
                "curator cache MISS for {} (conversation drifted)",
                path.display()
            );
            return None;
        }
        Some(cache)
    }
}
