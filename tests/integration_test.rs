// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end turn tests: scripted planner/worker responses drive the real
//! orchestrator against an in-memory repository and a stub container
//! runtime — no network, no Docker.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use troupe_config::{AgentRole, LlmConfig, SandboxConfig, SenderKind};
use troupe_core::{AgentServices, ContextBuilder, TeamOrchestrator};
use troupe_model::{LlmService, ScriptedMockProvider};
use troupe_sandbox::testing::StubRuntime;
use troupe_sandbox::{ContainerManager, FileService, SandboxCommandService};
use troupe_store::{
    AppendMessage, InMemorySessionRepository, LlmLog, Message, SessionRepository,
    SessionStateStore,
};
use troupe_stream::{EventSink, MessagePersister, StreamContext, StreamEvent};
use troupe_tools::builtin::build_tool_executor;

struct RecordingSink {
    events: Mutex<Vec<StreamEvent>>,
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&self, event: StreamEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

struct RepoPersister {
    repo: Arc<InMemorySessionRepository>,
    session_id: String,
    owner_id: String,
}

#[async_trait]
impl MessagePersister for RepoPersister {
    async fn persist(
        &self,
        sender: SenderKind,
        agent: Option<AgentRole>,
        content: &str,
        message_id: Option<&str>,
    ) -> anyhow::Result<Message> {
        Ok(self
            .repo
            .append_message(AppendMessage {
                session_id: &self.session_id,
                sender,
                agent,
                content,
                owner_id: Some(&self.owner_id),
                message_id,
            })
            .await?)
    }
}

struct Harness {
    orchestrator: TeamOrchestrator,
    repo: Arc<InMemorySessionRepository>,
    runtime: Arc<StubRuntime>,
    files: Arc<FileService>,
    session_id: String,
    sink: Arc<RecordingSink>,
    turn: StreamContext,
}

async fn harness(dir: &std::path::Path, scripts: Vec<Vec<Result<String, troupe_model::LlmError>>>) -> Harness {
    let mut sandbox_config = SandboxConfig::default();
    sandbox_config.base_path = dir.join("sandboxes");
    sandbox_config.exposed_ports = vec![3000];

    let runtime = Arc::new(StubRuntime::new());
    let manager = Arc::new(
        ContainerManager::new(sandbox_config, runtime.clone())
            .await
            .unwrap(),
    );
    let files = Arc::new(FileService::new(manager.clone()));
    let commands = Arc::new(SandboxCommandService::new(manager, runtime.clone()));

    let repo = Arc::new(InMemorySessionRepository::new());
    let state = Arc::new(SessionStateStore::new(dir.join("state")).unwrap());
    let llm_log = Arc::new(LlmLog::new(dir.join("state")).unwrap());

    let mut llm_config = LlmConfig::default();
    llm_config.default_provider = "mock".into();
    let llm = LlmService::new(&llm_config)
        .with_provider(Arc::new(ScriptedMockProvider::new(scripts)));

    let services = AgentServices {
        llm: Arc::new(llm),
        tools: Arc::new(build_tool_executor(files.clone(), commands)),
        llm_log,
    };
    let builder = ContextBuilder::new(repo.clone(), files.clone(), state.clone());
    let orchestrator = TeamOrchestrator::new(services, builder, state, Vec::new());

    let session = repo.create_session("owner-1", None).await.unwrap();
    repo.append_message(AppendMessage {
        session_id: &session.id,
        sender: SenderKind::User,
        agent: None,
        content: "Build a hello-world HTTP endpoint",
        owner_id: None,
        message_id: None,
    })
    .await
    .unwrap();

    let sink = Arc::new(RecordingSink {
        events: Mutex::new(Vec::new()),
    });
    let turn = StreamContext::new(
        session.id.clone(),
        "owner-1",
        Some(sink.clone() as Arc<dyn EventSink>),
        Arc::new(RepoPersister {
            repo: repo.clone(),
            session_id: session.id.clone(),
            owner_id: "owner-1".into(),
        }),
    );

    Harness {
        orchestrator,
        repo,
        runtime,
        files,
        session_id: session.id,
        sink,
        turn,
    }
}

const ENGINEER_OUTPUT: &str = "\
Implementing the endpoint now.

```file:main.go overwrite
package main
```endfile

```shell
go build
```endshell
";

#[tokio::test]
async fn happy_path_routing_runs_architect_then_engineer() {
    let dir = tempfile::tempdir().unwrap();
    let harness = harness(
        dir.path(),
        vec![
            // plan → architect
            ScriptedMockProvider::text(
                "Design first. {\"next_agent\": \"Architect\", \"reason\": \"layout needed\"}",
            ),
            // architect act
            ScriptedMockProvider::text("docs/design.md:\n- route /hello -> 200 \"hello\""),
            // review → engineer
            ScriptedMockProvider::text("{\"next_agent\": \"Engineer\", \"decision\": \"pass\", \"reason\": \"build it\"}"),
            // engineer act (writes a file, runs a command)
            ScriptedMockProvider::text(ENGINEER_OUTPUT),
            // review → finish
            ScriptedMockProvider::text("{\"next_agent\": \"finish\", \"decision\": \"finish\", \"reason\": \"complete\"}"),
            // summary
            ScriptedMockProvider::text("The endpoint is implemented and builds cleanly."),
        ],
    )
    .await;

    let responses = harness
        .orchestrator
        .run_turn(&harness.turn, "user-1", "Build a hello-world HTTP endpoint")
        .await
        .unwrap();

    // The workspace contains the engineer's file.
    let written = harness
        .files
        .read_file(&harness.session_id, "owner-1", "main.go")
        .await
        .unwrap();
    assert_eq!(written.content, "package main");

    // The shell command ran inside the container workspace.
    let commands = harness.runtime.exec_commands.lock().unwrap().clone();
    assert_eq!(commands, vec!["cd /workspace && go build"]);

    // One message per agent invocation plus statuses and tool calls.
    let planner_messages: Vec<&Message> = responses
        .iter()
        .filter(|m| m.sender == SenderKind::Planner)
        .collect();
    assert_eq!(planner_messages.len(), 4); // plan, two reviews, summary
    let agent_messages: Vec<&Message> = responses
        .iter()
        .filter(|m| m.sender == SenderKind::Agent && m.agent.is_some())
        .collect();
    assert!(agent_messages
        .iter()
        .any(|m| m.agent == Some(AgentRole::Architect)));
    let engineer = agent_messages
        .iter()
        .find(|m| m.agent == Some(AgentRole::Engineer) && m.content.contains("[file writes]"))
        .expect("engineer message");
    assert!(engineer.content.contains("[file writes]"));
    assert!(engineer.content.contains("- main.go"));
    assert!(engineer.content.contains("[sandbox shell]"));
    assert!(engineer.content.contains("go build (exit 0)"));

    // Status events include the delegation notes and the per-command report.
    let statuses: Vec<&Message> = responses
        .iter()
        .filter(|m| m.sender == SenderKind::Status)
        .collect();
    assert!(statuses
        .iter()
        .any(|m| m.content == "planner delegates to architect"));
    assert!(statuses
        .iter()
        .any(|m| m.content.contains("$ go build (exit 0)")));

    // Tool calls were recorded through the hook.
    assert!(responses
        .iter()
        .any(|m| m.content == "[tool call] file_write"));
    assert!(responses
        .iter()
        .any(|m| m.content == "[tool call] sandbox_shell"));

    // The final user-visible answer is the planner's summary.
    let last = responses.last().unwrap();
    assert_eq!(last.sender, SenderKind::Planner);
    assert!(last.content.contains("## Final report"));

    // The repository saw exactly the persisted turn messages plus the
    // original user message.
    let stored = harness
        .repo
        .list_messages(&harness.session_id, "owner-1")
        .await
        .unwrap();
    assert_eq!(stored.len(), responses.len() + 1);

    // Every final token event on the wire was preceded by its chunks and
    // nothing follows a final for the same id.
    let events = harness.sink.events.lock().unwrap();
    for (i, event) in events.iter().enumerate() {
        if let StreamEvent::Token {
            message_id,
            is_final: true,
            ..
        } = event
        {
            assert!(!events[i + 1..].iter().any(|later| matches!(
                later,
                StreamEvent::Token { message_id: later_id, .. } if later_id == message_id
            )));
        }
    }
}

#[tokio::test]
async fn provider_failure_mid_stream_aborts_the_turn() {
    let dir = tempfile::tempdir().unwrap();
    let harness = harness(
        dir.path(),
        vec![
            // plan → engineer
            ScriptedMockProvider::text("{\"next_agent\": \"Engineer\", \"reason\": \"go\"}"),
            // engineer act fails after two chunks
            ScriptedMockProvider::failing_after(vec!["chunk one ", "chunk two"], "stream reset"),
        ],
    )
    .await;

    let err = harness
        .orchestrator
        .run_turn(&harness.turn, "user-1", "Build it")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("stream reset"));

    let events = harness.sink.events.lock().unwrap();
    // Two non-final chunks for the failed message, then the persisted error
    // with the same id, and no final token for that id.
    let failed_id = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::Error {
                message_id,
                content,
                ..
            } if content.contains("stream reset") => Some(message_id.clone()),
            _ => None,
        })
        .expect("error event");
    let chunks = events
        .iter()
        .filter(|e| matches!(
            e,
            StreamEvent::Token { message_id, is_final: false, .. } if message_id == &failed_id
        ))
        .count();
    assert_eq!(chunks, 2);
    assert!(!events.iter().any(|e| matches!(
        e,
        StreamEvent::Token { message_id, is_final: true, .. } if message_id == &failed_id
    )));
    // The turn aborted before any tool could run.
    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamEvent::ToolCall { .. })));

    // The error is also in the session history.
    let stored = harness
        .repo
        .list_messages(&harness.session_id, "owner-1")
        .await
        .unwrap();
    assert!(stored
        .iter()
        .any(|m| m.sender == SenderKind::Status && m.content.contains("stream reset")));
}

#[tokio::test]
async fn planner_finishing_immediately_yields_summary_only() {
    let dir = tempfile::tempdir().unwrap();
    let harness = harness(
        dir.path(),
        vec![
            ScriptedMockProvider::text("{\"next_agent\": \"finish\", \"reason\": \"nothing to do\"}"),
            ScriptedMockProvider::text("Nothing needed doing."),
        ],
    )
    .await;

    let responses = harness
        .orchestrator
        .run_turn(&harness.turn, "user-1", "hi")
        .await
        .unwrap();
    assert!(!responses
        .iter()
        .any(|m| m.sender == SenderKind::Agent && m.agent != Some(AgentRole::Planner)));
    let last = responses.last().unwrap();
    assert_eq!(last.agent, Some(AgentRole::Planner));
    assert!(last.content.contains("Nothing needed doing."));
}
