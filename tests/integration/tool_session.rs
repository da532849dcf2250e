//! An agent's tool session against the stores the orchestrator created

use std::sync::Arc;

use reviewmaster::config::AgentPlansConfig;
use reviewmaster::context::{
    ContextSyncBridge, FileContextStore, JobContextEntry, JobContextRegistry, ReviewContextStore,
};
use reviewmaster::domain::{
    JobType, Platform, ReviewContext, ReviewContextThread, ReviewPhase, ThreadStatus,
};
use reviewmaster::progress::{to_review_progress, ProgressStore};
use reviewmaster::tools::{ToolContext, ToolServer};
use serde_json::json;

use super::{call_ok, call_tool};

const JOB_ID: &str = "gitlab-followup:team/api:42";
const MR_ID: &str = "gitlab-team/api-42";
const CONTEXT_DIR: &str = ".reviewmaster/contexts";

fn thread(id: &str, file: &str) -> ReviewContextThread {
    ReviewContextThread {
        id: id.to_string(),
        file: Some(file.to_string()),
        line: Some(10),
        status: ThreadStatus::Open,
        body: "Please handle the error".to_string(),
    }
}

/// Orchestrator-side and tool-side handles on the same files
struct Session {
    work: tempfile::TempDir,
    _data: tempfile::TempDir,
    orchestrator_store: FileContextStore,
    server: ToolServer,
}

async fn session() -> Session {
    let work = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let registry_path = data.path().join("job-contexts.json");

    // The tool process opens its registry before the job is registered
    let tool_registry = Arc::new(JobContextRegistry::durable(&registry_path).await.unwrap());
    let tool_store: Arc<dyn ReviewContextStore> = Arc::new(FileContextStore::new(CONTEXT_DIR));

    let orchestrator_registry = JobContextRegistry::durable(&registry_path).await.unwrap();
    let orchestrator_store = FileContextStore::new(CONTEXT_DIR);
    orchestrator_store
        .create(
            work.path(),
            ReviewContext::new(MR_ID, Platform::Gitlab, "team/api", 42)
                .with_job_type(JobType::Followup)
                .with_threads(vec![thread("t1", "src/lib.rs"), thread("t2", "src/main.rs")]),
        )
        .await
        .unwrap();
    orchestrator_registry
        .register(JOB_ID, JobContextEntry::new(work.path(), MR_ID))
        .await
        .unwrap();

    let progress = ProgressStore::new();
    progress
        .subscribe(Arc::new(ContextSyncBridge::new(
            tool_store.clone(),
            tool_registry.clone(),
        )))
        .await;
    let server = ToolServer::with_review_tools(ToolContext::new(
        progress,
        tool_store,
        tool_registry,
        AgentPlansConfig::default(),
    ));

    Session {
        work,
        _data: data,
        orchestrator_store,
        server,
    }
}

impl Session {
    async fn document(&self) -> ReviewContext {
        self.orchestrator_store
            .read(self.work.path(), MR_ID)
            .await
            .unwrap()
            .unwrap()
    }
}

#[tokio::test]
async fn test_followup_session_is_mirrored_into_the_document() {
    let s = session().await;

    let workflow = call_ok(&s.server, "get_workflow", json!({ "jobId": JOB_ID })).await;
    let names: Vec<&str> = workflow["agents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["context", "verify", "scan", "threads", "report"]);
    assert!(workflow["agents"]
        .as_array()
        .unwrap()
        .iter()
        .all(|a| a["status"] == "pending"));

    let started = call_ok(
        &s.server,
        "start_agent",
        json!({ "jobId": JOB_ID, "agentName": "context" }),
    )
    .await;
    assert_eq!(started["overallProgress"], 8);
    assert_eq!(s.document().await.progress.current_step.as_deref(), Some("context"));

    let completed = call_ok(
        &s.server,
        "complete_agent",
        json!({ "jobId": JOB_ID, "agentName": "context", "status": "success" }),
    )
    .await;
    assert_eq!(completed["overallProgress"], 16);

    let doc = s.document().await;
    assert_eq!(doc.progress.steps_completed, ["context"]);
    assert!(doc.progress.current_step.is_none());

    call_ok(
        &s.server,
        "start_agent",
        json!({ "jobId": JOB_ID, "agentName": "verify" }),
    )
    .await;
    let failed = call_ok(
        &s.server,
        "complete_agent",
        json!({ "jobId": JOB_ID, "agentName": "verify", "status": "failed", "error": "lint crashed" }),
    )
    .await;
    assert_eq!(failed["status"], "failed");
    assert_eq!(failed["error"], "lint crashed");

    let phase = call_ok(
        &s.server,
        "set_phase",
        json!({ "jobId": JOB_ID, "phase": "completed" }),
    )
    .await;
    assert_eq!(phase["phase"], "completed");

    let doc = s.document().await;
    assert_eq!(doc.progress.phase, ReviewPhase::Completed);
    assert_eq!(doc.progress.steps_completed, ["context", "verify"]);

    let presented = to_review_progress(&doc.progress, doc.agents.as_deref());
    assert_eq!(presented.overall_progress, 100);
    assert_eq!(presented.agents.len(), 5);
}

#[tokio::test]
async fn test_actions_and_thread_status() {
    let s = session().await;

    let reply = call_ok(
        &s.server,
        "add_action",
        json!({ "jobId": JOB_ID, "type": "THREAD_REPLY", "threadId": "t2", "message": "Done in 1f3a" }),
    )
    .await;
    call_ok(
        &s.server,
        "add_action",
        json!({ "jobId": JOB_ID, "type": "THREAD_RESOLVE", "threadId": "t1" }),
    )
    .await;
    call_ok(
        &s.server,
        "add_action",
        json!({ "jobId": JOB_ID, "type": "ADD_LABEL", "label": "reviewed" }),
    )
    .await;

    let threads = call_ok(&s.server, "get_threads", json!({ "jobId": JOB_ID })).await;
    assert_eq!(threads["count"], 2);
    assert_eq!(threads["threads"][0]["status"], "resolved");
    assert_eq!(threads["threads"][1]["status"], "open");

    let doc = s.document().await;
    assert_eq!(doc.actions.len(), 3);
    assert_eq!(doc.actions[0].id, reply["actionId"].as_str().unwrap());
    assert_eq!(doc.thread_status("t1"), Some(ThreadStatus::Resolved));
    assert_eq!(doc.open_thread_count(), 1);
}

#[tokio::test]
async fn test_failures_are_tool_results() {
    let s = session().await;

    let unknown_job = call_tool(
        &s.server,
        "start_agent",
        json!({ "jobId": "gitlab:team/api:999", "agentName": "context" }),
    )
    .await;
    assert_eq!(unknown_job["isError"], true);
    assert_eq!(
        unknown_job["content"][0]["text"],
        "No progress found for job: gitlab:team/api:999"
    );

    let unknown_agent = call_tool(
        &s.server,
        "start_agent",
        json!({ "jobId": JOB_ID, "agentName": "security" }),
    )
    .await;
    assert_eq!(unknown_agent["content"][0]["text"], "Agent not found: security");

    let missing_field = call_tool(&s.server, "get_threads", json!({})).await;
    assert_eq!(
        missing_field["content"][0]["text"],
        "Missing or invalid required field: jobId"
    );

    let unknown_tool = call_tool(&s.server, "merge", json!({ "jobId": JOB_ID })).await;
    assert_eq!(unknown_tool["isError"], true);
    assert_eq!(unknown_tool["content"][0]["text"], "Unknown tool: merge");

    // nothing above touched the document
    let doc = s.document().await;
    assert!(doc.actions.is_empty());
    assert_eq!(doc.progress.phase, ReviewPhase::Initializing);
}

#[tokio::test]
async fn test_document_removed_mid_session() {
    let s = session().await;
    call_ok(&s.server, "get_workflow", json!({ "jobId": JOB_ID })).await;

    assert!(s
        .orchestrator_store
        .delete(s.work.path(), MR_ID)
        .await
        .unwrap());
    assert!(!s.orchestrator_store.exists(s.work.path(), MR_ID).await);

    // progress still lives in the tool process; the mirror write is absorbed
    let started = call_ok(
        &s.server,
        "start_agent",
        json!({ "jobId": JOB_ID, "agentName": "context" }),
    )
    .await;
    assert_eq!(started["agentName"], "context");

    let threads = call_tool(&s.server, "get_threads", json!({ "jobId": JOB_ID })).await;
    assert_eq!(
        threads["content"][0]["text"],
        format!("Review context not found: {}", MR_ID)
    );
}
