//! Curator cache behavior through the full loop (S3).
//!
//! Two identical reads inside one tool iteration share a conversation
//! hash, so the second is a cache hit and the sub-agent runs once. A read
//! in a later turn sees a drifted conversation hash and re-runs it.

mod common;

use common::{CollectingHost, MockProvider, Script, SharedProvider};
use codeloop::{Config, MasterLoop, MessageRole, PolicyStore, ToolCall, ToolResult};
use serde_json::json;
use std::sync::Arc;

const CURATOR_JSON: &str = r#"{"line_ranges":[{"start":1,"end":12,"reason":"error handling"}],"summary":"error handling helpers","preserved_percentage":8.0}"#;

fn big_file(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("handlers.rs");
    let body = (1..=400)
        .map(|i| format!("fn handler_{}() {{}}", i))
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(&path, body).unwrap();
    path
}

fn agent_with(provider: Arc<MockProvider>, workdir: &std::path::Path) -> MasterLoop {
    let mut config = Config::default();
    config.compression.enabled = false;
    config.file_read_small_threshold = 100;
    MasterLoop::new(
        config,
        Box::new(SharedProvider(provider)),
        workdir.to_path_buf(),
        PolicyStore::ephemeral(),
    )
}

fn tool_outputs(agent: &MasterLoop) -> Vec<String> {
    agent
        .messages()
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .map(|m| {
            let result: ToolResult = serde_json::from_str(&m.content).unwrap();
            result.data.unwrap_or_default()
        })
        .collect()
}

#[tokio::test]
async fn test_s3_same_iteration_reads_hit_cache() {
    let dir = tempfile::tempdir().unwrap();
    big_file(dir.path());

    let provider = Arc::new(MockProvider::new(vec![
        // The model reads the same large file twice in one batch.
        Script::tools(vec![
            ToolCall::new("call_1", "read_file", json!({"path": "handlers.rs"})),
            ToolCall::new("call_2", "read_file", json!({"path": "handlers.rs"})),
        ]),
        // The curator runs exactly once, for the first read.
        Script::text(CURATOR_JSON),
        // Final answer.
        Script::text("summarized"),
    ]));
    let mut agent = agent_with(provider.clone(), dir.path());
    let mut host = CollectingHost::allowing();

    agent.run_turn("read handlers.rs twice", &mut host).await.unwrap();

    // 3 requests total: main, curator, main. A second curator run would
    // have exhausted the scripts and panicked.
    assert_eq!(provider.request_count(), 3);

    // Curator idempotence: byte-equal excerpts from both reads.
    let outputs = tool_outputs(&agent);
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0], outputs[1]);
    assert!(outputs[0].contains("error handling helpers"));
    assert!(outputs[0].contains("-- lines 1-12"));
}

#[tokio::test]
async fn test_s3_conversation_drift_reruns_curator() {
    let dir = tempfile::tempdir().unwrap();
    big_file(dir.path());

    let provider = Arc::new(MockProvider::new(vec![
        // Turn 1: read, curate, answer.
        Script::tools(vec![ToolCall::new(
            "call_1",
            "read_file",
            json!({"path": "handlers.rs"}),
        )]),
        Script::text(CURATOR_JSON),
        Script::text("read it"),
        // Turn 2: the conversation advanced, so the cache misses and the
        // curator runs again.
        Script::tools(vec![ToolCall::new(
            "call_2",
            "read_file",
            json!({"path": "handlers.rs"}),
        )]),
        Script::text(CURATOR_JSON),
        Script::text("read it again"),
    ]));
    let mut agent = agent_with(provider.clone(), dir.path());
    let mut host = CollectingHost::allowing();

    agent.run_turn("read handlers.rs", &mut host).await.unwrap();
    assert_eq!(provider.request_count(), 3);

    agent
        .run_turn("what about error handling in it?", &mut host)
        .await
        .unwrap();
    // All six scripts consumed: the second turn re-invoked the curator.
    assert_eq!(provider.request_count(), 6);
}

#[tokio::test]
async fn test_curator_failure_degrades_to_full_file() {
    let dir = tempfile::tempdir().unwrap();
    big_file(dir.path());

    let provider = Arc::new(MockProvider::new(vec![
        Script::tools(vec![ToolCall::new(
            "call_1",
            "read_file",
            json!({"path": "handlers.rs"}),
        )]),
        // Three malformed curator responses exhaust the retries.
        Script::text("no json here"),
        Script::text("still no json"),
        Script::text("{\"line_ranges\":[],\"summary\":\"empty\"}"),
        Script::text("fell back"),
    ]));
    let mut agent = agent_with(provider.clone(), dir.path());
    let mut host = CollectingHost::allowing();

    agent.run_turn("read handlers.rs", &mut host).await.unwrap();

    // The read still succeeded, with the whole file.
    let outputs = tool_outputs(&agent);
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].contains("fn handler_400()"));
    assert_eq!(provider.request_count(), 5);
}
