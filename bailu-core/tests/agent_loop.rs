//! End-to-end scenarios: a scripted transport drives the orchestrator
//! against a real temporary workspace through the public API.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use bailu_core::backup::BackupManager;
use bailu_core::mediator::{ApprovalDecision, ApprovalPrompt, ApprovalRequest, SafetyMediator};
use bailu_core::orchestrator::{Orchestrator, OrchestratorConfig};
use bailu_core::tools::builtin_registry;
use bailu_core::transport::{ChatTransport, ChunkStream};
use bailu_core::types::{
    ExecutionContext, Message, Role, SafetyMode, ToolDefinition,
};
use bailu_core::Conversation;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct ScriptedTransport {
    responses: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
        })
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat_stream(
        &self,
        _messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<ChunkStream> {
        let mut responses = self.responses.lock().unwrap();
        let text = if responses.is_empty() {
            "ran out of scripted responses".to_string()
        } else {
            responses.remove(0)
        };
        Ok(futures::stream::iter(vec![Ok(text)]).boxed())
    }

    async fn chat(
        &self,
        _messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<String> {
        Ok(String::new())
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec![])
    }

    fn current_model_name(&self) -> String {
        "scripted".into()
    }
}

struct AutoApprove;

#[async_trait]
impl ApprovalPrompt for AutoApprove {
    async fn confirm(&self, _request: &ApprovalRequest) -> Result<ApprovalDecision> {
        Ok(ApprovalDecision::Yes)
    }
    async fn confirm_rollback(&self, _path: &Path, _error: &str) -> Result<bool> {
        Ok(false)
    }
}

struct Harness {
    orchestrator: Orchestrator,
    backups: Arc<BackupManager>,
}

fn harness(dir: &TempDir, responses: &[&str], mode: SafetyMode) -> Harness {
    let backups = Arc::new(BackupManager::new());
    let registry = Arc::new(builtin_registry(backups.clone()).unwrap());
    let mediator = SafetyMediator::new(
        registry,
        backups.clone(),
        Arc::new(AutoApprove),
        ExecutionContext::new(dir.path().to_path_buf(), mode),
    );
    Harness {
        orchestrator: Orchestrator::new(
            ScriptedTransport::new(responses),
            mediator,
            OrchestratorConfig::default(),
        ),
        backups,
    }
}

fn conversation(prompt: &str) -> Conversation {
    let mut conv = Conversation::new("You are a coding assistant.");
    conv.push(Message::user(prompt));
    conv
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn read_only_question_no_tools() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(&dir, &["There are 12 files in src/."], SafetyMode::Review);

    let mut conv = conversation("how many files in src/?");
    let outcome = h
        .orchestrator
        .run(&mut conv, CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.tool_calls_executed, 0);
    assert_eq!(outcome.final_response, "There are 12 files in src/.");
}

#[tokio::test]
async fn single_read_file_call() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("README.md"), "hello").unwrap();

    let mut h = harness(
        &dir,
        &[
            "<action><invoke tool=\"read_file\"><param name=\"path\">README.md</param></invoke></action>",
            "The file contains the word hello.",
        ],
        SafetyMode::Review,
    );

    let mut conv = conversation("what is in README.md?");
    let outcome = h
        .orchestrator
        .run(&mut conv, CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.tool_calls_executed, 1);
    assert_eq!(outcome.final_response, "The file contains the word hello.");

    let tool_feedback = conv
        .messages()
        .iter()
        .find(|m| m.role == Role::User && m.content.contains("<tool_result"))
        .expect("tool feedback message");
    assert!(tool_feedback.content.contains("hello"));
}

#[tokio::test]
async fn path_violation_is_rejected_and_loop_continues() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(
        &dir,
        &[
            "<action><invoke tool=\"read_file\"><param name=\"path\">../../etc/passwd</param></invoke></action>",
            "I cannot read outside the workspace.",
        ],
        SafetyMode::Review,
    );

    let mut conv = conversation("read /etc/passwd please");
    let outcome = h
        .orchestrator
        .run(&mut conv, CancellationToken::new())
        .await
        .unwrap();

    // The rejection was fed back and the model answered on iteration 2.
    assert!(outcome.success);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.final_response, "I cannot read outside the workspace.");

    let feedback = conv
        .messages()
        .iter()
        .find(|m| m.role == Role::User && m.content.contains("path-violation"))
        .expect("violation feedback");
    assert!(feedback.content.contains("🔒"));
}

#[tokio::test]
async fn diff_apply_with_backup_and_rollback() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("a.txt");
    std::fs::write(&file, "one\ntwo\nthree\n").unwrap();

    let action = "<action><invoke tool=\"apply_diff\">\
<param name=\"path\">a.txt</param>\
<param name=\"diff\">@@ -1,3 +1,3 @@\n one\n-two\n+TWO\n three\n</param>\
</invoke></action>";
    let mut h = harness(&dir, &[action, "Applied the change."], SafetyMode::AutoApply);

    let mut conv = conversation("capitalize the second line of a.txt");
    let outcome = h
        .orchestrator
        .run(&mut conv, CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.success);

    assert_eq!(
        std::fs::read_to_string(&file).unwrap(),
        "one\nTWO\nthree\n"
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt.backup")).unwrap(),
        "one\ntwo\nthree\n"
    );

    // Metadata reported the line counts to the model.
    let feedback = conv
        .messages()
        .iter()
        .find(|m| m.content.contains("linesAdded"))
        .expect("diff metadata");
    assert!(feedback.content.contains("\"linesAdded\":1"));
    assert!(feedback.content.contains("\"linesRemoved\":1"));

    // Rollback restores the original bytes.
    h.backups.restore(&file).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&file).unwrap(),
        "one\ntwo\nthree\n"
    );
}

#[tokio::test]
async fn destructive_command_is_blocked() {
    let dir = TempDir::new().unwrap();
    let mut h = harness(
        &dir,
        &[
            "<action><invoke tool=\"run_command\"><param name=\"command\">rm -rf /</param></invoke></action>",
            "That command is not allowed.",
        ],
        SafetyMode::AutoApply,
    );

    let mut conv = conversation("clean everything up");
    let outcome = h
        .orchestrator
        .run(&mut conv, CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.success);

    let feedback = conv
        .messages()
        .iter()
        .find(|m| m.content.contains("blocked"))
        .expect("blocked feedback");
    assert!(feedback.content.contains("blocked:"));
}

#[tokio::test]
async fn consecutive_failure_circuit_breaker() {
    let dir = TempDir::new().unwrap();
    // Writing through a path that escapes the workspace fails identically
    // every iteration.
    let failing = "<action><invoke tool=\"write_file\">\
<param name=\"path\">/tmp/outside-the-workspace.txt</param>\
<param name=\"content\">x</param></invoke></action>";
    let mut h = harness(
        &dir,
        &[failing, failing, failing, failing],
        SafetyMode::AutoApply,
    );

    let mut conv = conversation("write that file");
    let outcome = h
        .orchestrator
        .run(&mut conv, CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.iterations, 3);
    assert!(outcome.final_response.contains("write_file"));
}
