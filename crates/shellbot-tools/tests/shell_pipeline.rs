//! End-to-end runs of the shell agent against a real `bash`, with the chat
//! model replaced by a scripted backend.

#![cfg(unix)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use shellbot_core::config::{ExecutorConfig, ExecutorMode};
use shellbot_core::error::BotError;
use shellbot_core::llm::ChatBackend;
use shellbot_core::tool_registry::ToolRegistry;
use shellbot_tools::executor::ShellExecutor;
use shellbot_tools::shell_agent::ShellAgentTool;
use shellbot_tools::{ShellTaskRunner, Translator};

struct ScriptedChat {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedChat {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn complete(&self, _system: &str, user: &str) -> Result<String, BotError> {
        self.prompts.lock().unwrap().push(user.to_string());
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "NONE".to_string()))
    }
}

fn agent(chat: Arc<ScriptedChat>, work_dir: &std::path::Path, timeout_secs: u64) -> ToolRegistry {
    let executor = ShellExecutor::new(&ExecutorConfig {
        mode: ExecutorMode::Direct,
        timeout_secs,
        work_dir: Some(work_dir.display().to_string()),
        ..ExecutorConfig::default()
    });
    let runner = ShellTaskRunner::new(Arc::new(Translator::new(chat)), Arc::new(executor));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ShellAgentTool::new(Arc::new(runner), 16_000)));
    registry
}

#[tokio::test]
async fn literal_command_runs_without_the_model() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "alpha\nbeta\n").unwrap();
    let chat = ScriptedChat::new(&[]);

    let output = agent(chat.clone(), dir.path(), 10)
        .execute("shell_agent", json!({"instruction": "grep beta notes.txt"}))
        .await;

    assert!(!output.is_error);
    assert_eq!(output.content, "$ grep beta notes.txt\nbeta");
    assert!(chat.prompts().is_empty());
}

#[tokio::test]
async fn failed_attempt_is_refined_with_its_stderr() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "").unwrap();
    let chat = ScriptedChat::new(&["ls missing-dir", "ls"]);

    let output = agent(chat.clone(), dir.path(), 10)
        .execute("shell_agent", json!({"instruction": "show me what is in this folder"}))
        .await;

    assert_eq!(output.content, "$ ls\nmarker.txt");
    let prompts = chat.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("Previous command: ls missing-dir"));
    assert!(prompts[1].to_lowercase().contains("no such file or directory"));
    assert!(prompts[1].contains("Original task: show me what is in this folder"));
}

#[tokio::test]
async fn unsafe_model_reply_is_never_executed() {
    let dir = tempfile::tempdir().unwrap();
    let chat = ScriptedChat::new(&["echo pwned > owned.txt"]);

    let output = agent(chat, dir.path(), 10)
        .execute("shell_agent", json!({"instruction": "write a file"}))
        .await;

    assert!(output.content.contains("redirections are not allowed"));
    assert!(!dir.path().join("owned.txt").exists());
}

#[tokio::test]
async fn pipelines_keep_their_original_spelling() {
    let dir = tempfile::tempdir().unwrap();
    let chat = ScriptedChat::new(&["printf 'b\\na\\nb\\n' | sort | uniq -c | sort -rn"]);

    let output = agent(chat, dir.path(), 10)
        .execute("shell_agent", json!({"instruction": "count the letters"}))
        .await;

    let mut lines = output.content.lines();
    assert_eq!(lines.next(), Some("$ printf 'b\\na\\nb\\n' | sort | uniq -c | sort -rn"));
    assert_eq!(lines.next().map(str::trim), Some("2 b"));
    assert_eq!(lines.next().map(str::trim), Some("1 a"));
}

#[tokio::test]
async fn hung_command_is_killed_at_the_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let chat = ScriptedChat::new(&[]);
    let started = std::time::Instant::now();

    let output = agent(chat.clone(), dir.path(), 1)
        .execute("shell_agent", json!({"instruction": "tail -f /dev/null | cat"}))
        .await;

    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert!(output.content.contains("Exit code: -1"));
    assert!(output.content.contains("Command timed out after 1 seconds."));
    // The refinement request was answered with NONE, so nothing else ran.
    assert_eq!(chat.prompts().len(), 1);
}

fn processes_mentioning(marker: &str) -> String {
    let output = std::process::Command::new("pgrep")
        .args(["-a", "-f", marker])
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[tokio::test]
async fn timeout_leaves_no_pipeline_member_running() {
    let dir = tempfile::tempdir().unwrap();
    let marker = format!("stuck-{}", uuid::Uuid::new_v4());
    std::fs::write(dir.path().join(&marker), "").unwrap();
    let chat = ScriptedChat::new(&[]);

    let output = agent(chat, dir.path(), 1)
        .execute(
            "shell_agent",
            json!({"instruction": format!("tail -f {marker} | tail -f {marker}")}),
        )
        .await;
    assert!(output.content.contains("Exit code: -1"));

    let mut survivors = processes_mentioning(&marker);
    for _ in 0..20 {
        if survivors.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        survivors = processes_mentioning(&marker);
    }
    assert_eq!(survivors, "");
}
