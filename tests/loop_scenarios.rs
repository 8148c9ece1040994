//! End-to-end master-loop scenarios against a scripted provider.

mod common;

use common::{CollectingHost, MockProvider, Script, SharedProvider, assert_tool_messages_complete};
use codeloop::{
    Config, MAX_ITERATIONS_PER_TURN, MasterLoop, MessageRole, PolicyDecision, PolicyRecord,
    PolicyStore, PromptResponse, ToolCall, ToolResult,
};
use serde_json::json;
use std::sync::Arc;

fn agent_with(
    provider: Arc<MockProvider>,
    workdir: &std::path::Path,
    policies: PolicyStore,
) -> MasterLoop {
    let mut config = Config::default();
    config.compression.enabled = false; // scenario tests pin tool behavior
    MasterLoop::new(
        config,
        Box::new(SharedProvider(provider)),
        workdir.to_path_buf(),
        policies,
    )
}

/// Autonomous multi-step: the model issues two safe tools, both execute,
/// and the second round assembles the final answer. Two iterations, two
/// tool calls, no prompts.
#[tokio::test]
async fn test_s1_autonomous_multi_step() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("README.md"), "hi").unwrap();

    let provider = Arc::new(MockProvider::new(vec![
        Script::tools(vec![
            ToolCall::new("call_1", "get_file_tree", json!({})),
            ToolCall::new("call_2", "get_current_time", json!({})),
        ]),
        Script::text("The project has a README and the time is above."),
    ]));
    let mut agent = agent_with(provider.clone(), dir.path(), PolicyStore::ephemeral());
    let mut host = CollectingHost::allowing();

    agent
        .run_turn("What files exist and what time is it?", &mut host)
        .await
        .unwrap();

    // Two model round-trips.
    assert_eq!(provider.request_count(), 2);
    // No permission prompts for safe tools.
    assert!(host.prompts.is_empty());

    // Both tool results present, in call order, before the final answer.
    let tool_messages: Vec<_> = agent
        .messages()
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .collect();
    assert_eq!(tool_messages.len(), 2);
    assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(tool_messages[1].tool_call_id.as_deref(), Some("call_2"));

    let tree_result: ToolResult =
        serde_json::from_str(&tool_messages[0].content).unwrap();
    assert!(tree_result.success);
    assert!(tree_result.data.unwrap().contains("README.md"));

    assert_eq!(
        agent.messages().last().unwrap().content,
        "The project has a README and the time is above."
    );
    assert_tool_messages_complete(agent.messages());
}

/// Permission denied mid-turn: a durable always-deny policy turns the call
/// into a permission_denied result; the model adapts; no file I/O happens.
#[tokio::test]
async fn test_s2_permission_denied_mid_turn() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("README.md"), "secret").unwrap();

    let mut store = PolicyStore::ephemeral();
    store.remember(PolicyRecord {
        tool_name: "read_file".to_string(),
        decision: PolicyDecision::AlwaysDeny,
        created_unix_ms: 0,
        pattern: None,
    });

    let provider = Arc::new(MockProvider::new(vec![
        Script::tools(vec![ToolCall::new(
            "call_1",
            "read_file",
            json!({"path": "README.md"}),
        )]),
        Script::text("I don't have permission to read that file."),
    ]));
    let mut agent = agent_with(provider.clone(), dir.path(), store);
    let mut host = CollectingHost::allowing();

    agent.run_turn("Read README.md", &mut host).await.unwrap();

    // Denied without prompting (policy decided it).
    assert!(host.prompts.is_empty());

    let tool_message = agent
        .messages()
        .iter()
        .find(|m| m.role == MessageRole::Tool)
        .unwrap();
    let result: ToolResult = serde_json::from_str(&tool_message.content).unwrap();
    assert!(!result.success);
    assert_eq!(result.error_kind, codeloop::ErrorKind::PermissionDenied);

    // No file I/O occurred: the tracker never saw the path.
    assert!(agent.tracker().tracked(&dir.path().join("README.md")).is_none());

    // The model got to respond after the denial.
    assert_eq!(
        agent.messages().last().unwrap().content,
        "I don't have permission to read that file."
    );
    assert_tool_messages_complete(agent.messages());
}

/// A prompt-gated tool runs when the user allows once.
#[tokio::test]
async fn test_prompted_tool_executes_on_allow() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "alpha\nbeta\n").unwrap();

    let provider = Arc::new(MockProvider::new(vec![
        Script::tools(vec![ToolCall::new(
            "call_1",
            "read_file",
            json!({"path": "notes.txt"}),
        )]),
        Script::text("done"),
    ]));
    let mut agent = agent_with(provider.clone(), dir.path(), PolicyStore::ephemeral());
    let mut host = CollectingHost::allowing();

    agent.run_turn("read notes.txt", &mut host).await.unwrap();

    assert_eq!(host.prompts, vec!["read_file"]);
    let tool_message = agent
        .messages()
        .iter()
        .find(|m| m.role == MessageRole::Tool)
        .unwrap();
    let result: ToolResult = serde_json::from_str(&tool_message.content).unwrap();
    assert!(result.success);
    assert!(agent.tracker().tracked(&dir.path().join("notes.txt")).is_some());
}

/// A denial at the prompt still produces a result and the turn continues.
#[tokio::test]
async fn test_prompt_denial_reported_to_model() {
    let dir = tempfile::tempdir().unwrap();

    let provider = Arc::new(MockProvider::new(vec![
        Script::tools(vec![ToolCall::new(
            "call_1",
            "write_file",
            json!({"path": "out.txt", "content": "x"}),
        )]),
        Script::text("understood, not writing"),
    ]));
    let mut agent = agent_with(provider.clone(), dir.path(), PolicyStore::ephemeral());
    let mut host = CollectingHost::with_response(PromptResponse::Deny);

    agent.run_turn("write something", &mut host).await.unwrap();

    assert_eq!(host.prompts, vec!["write_file"]);
    assert!(!dir.path().join("out.txt").exists());
    assert_eq!(provider.request_count(), 2);
    assert_tool_messages_complete(agent.messages());
}

/// Iteration cap: a pathological model that always requests the same tool
/// is halted with a diagnostic assistant message after the cap.
#[tokio::test]
async fn test_s6_iteration_cap() {
    let dir = tempfile::tempdir().unwrap();

    let provider = Arc::new(MockProvider::repeating(Script::tools(vec![ToolCall::new(
        "call_loop",
        "get_current_time",
        json!({}),
    )])));
    let mut agent = agent_with(provider.clone(), dir.path(), PolicyStore::ephemeral());
    let mut host = CollectingHost::allowing();

    agent.run_turn("loop forever", &mut host).await.unwrap();

    // The cap allows MAX_ITERATIONS_PER_TURN full iterations; the next
    // response's calls are answered with synthesized errors, not executed.
    assert_eq!(
        provider.request_count() as u32,
        MAX_ITERATIONS_PER_TURN + 1
    );

    let last = agent.messages().last().unwrap();
    assert_eq!(last.role, MessageRole::Assistant);
    assert!(last.content.contains("Iteration cap"));

    let tool_messages = agent
        .messages()
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .count();
    assert_eq!(tool_messages as u32, MAX_ITERATIONS_PER_TURN + 1);
    assert_tool_messages_complete(agent.messages());
}

/// Boundary: a stream with no text and no tool calls stores an empty
/// assistant message and ends the turn.
#[tokio::test]
async fn test_empty_response_stored() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::new(vec![Script::text("")]));
    let mut agent = agent_with(provider.clone(), dir.path(), PolicyStore::ephemeral());
    let mut host = CollectingHost::allowing();

    agent.run_turn("say nothing", &mut host).await.unwrap();

    let last = agent.messages().last().unwrap();
    assert_eq!(last.role, MessageRole::Assistant);
    assert!(last.content.is_empty());
    assert_eq!(provider.request_count(), 1);
}

/// The hot-context slot stays at index 1 and reflects tracker state at
/// send time.
#[tokio::test]
async fn test_hot_context_injected_at_index_1() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();

    let provider = Arc::new(MockProvider::new(vec![
        Script::tools(vec![ToolCall::new(
            "call_1",
            "read_file",
            json!({"path": "main.rs"}),
        )]),
        Script::text("read it"),
        Script::text("second turn answer"),
    ]));
    let mut agent = agent_with(provider.clone(), dir.path(), PolicyStore::ephemeral());
    let mut host = CollectingHost::allowing();

    agent.run_turn("read main.rs", &mut host).await.unwrap();
    agent.run_turn("tell me about main.rs", &mut host).await.unwrap();

    let requests = provider.requests.lock().unwrap();
    let final_request = requests.last().unwrap();

    // Index 0 system prompt, index 1 the synthesized snapshot.
    assert_eq!(final_request[0].role, MessageRole::System);
    assert_eq!(final_request[1].role, MessageRole::System);
    assert!(final_request[1].content.contains("main.rs"));
}
