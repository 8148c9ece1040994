//! # codeloop
//!
//! A terminal coding assistant for local LLM servers (Ollama, LM Studio)
//! built around an agentic master loop: the model calls tools, observes
//! results, and iterates until the user's request is complete.
//!
//! ## Architecture
//!
//! - **agent**: the master loop owning the conversation: streaming, tool
//!   iterations, compression, hot-context injection
//! - **provider**: streaming LLM clients (Ollama NDJSON, LM Studio SSE)
//!   with tool-call reassembly and cancellation
//! - **machine**: the per-iteration tool-execution state machine, exposed
//!   as a non-blocking ticker with permission gating
//! - **tools**: the registry and executors (file tree, reads with
//!   curation, line edits, tasks, time)
//! - **tracker**: session context tracking: file reads, modifications,
//!   the curator cache, and the conversation hash
//! - **compression**: automatic history compaction with a protected tail
//! - **curator**: the single-shot file-relevance sub-agent
//! - **permissions**: risk-based policy evaluation with durable policies
//! - **estimator**: O(1) token accounting and the compression trigger
//! - **hot_context**: the synthesized work-state snapshot at index 1
//! - **config**: the JSON config file and provider selection
//!
//! ## Quick tour
//!
//! ```rust,no_run
//! use codeloop::{Config, MasterLoop, PolicyStore, provider};
//!
//! # async fn run(mut host: impl codeloop::Host) -> codeloop::Result<()> {
//! let config = Config::load()?;
//! let backend = provider::build_provider(&config)?;
//! let mut agent = MasterLoop::new(
//!     config,
//!     backend,
//!     std::env::current_dir().unwrap(),
//!     PolicyStore::load(&Config::policies_path()),
//! );
//! agent.run_turn("what files are in this project?", &mut host).await?;
//! # Ok(())
//! # }
//! ```

mod agent;
mod compression;
mod config;
mod curator;
mod error;
mod estimator;
mod hot_context;
mod machine;
mod permissions;
mod tasks;
mod tracker;
mod types;

pub mod provider;
pub mod retry;
pub mod tools;

pub use agent::{Host, MasterLoop};
pub use compression::{CompressionMode, CompressionReport, compress, protected_indices};
pub use config::{CompressionConfig, Config, Provider};
pub use curator::{Curation, render_excerpt};
pub use error::{Error, Result};
pub use estimator::TokenEstimator;
pub use hot_context::build as build_hot_context;
pub use machine::{
    MAX_ITERATIONS_PER_TURN, MAX_TOOL_CALLS_PER_ITERATION, MachineDeps, MachineState, TickAction,
    ToolMachine,
};
pub use permissions::{
    Decision, PermissionEngine, PolicyDecision, PolicyRecord, PolicyStore, PromptResponse,
    RiskLevel,
};
pub use tasks::{Task, TaskCounts, TaskList, TaskStatus};
pub use tracker::{
    ContextTracker, CurationCache, CuratedRange, FileTracker, LineRange, Modification,
    ModificationKind, ReadKind, content_hash, conversation_hash,
};
pub use types::{ErrorKind, Message, MessageRole, ToolCall, ToolResult, ToolResultMetadata};

/// Current wall clock as unix milliseconds.
pub(crate) fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
