//! Submit to finish, with an in-process agent driving the tool server

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reviewmaster::config::{AgentPlansConfig, QueueConfig};
use reviewmaster::context::{
    ContextSyncBridge, FileContextStore, JobContextRegistry, ReviewContextStore,
};
use reviewmaster::domain::{
    ContextProgress, Job, JobType, MrState, Platform, ReviewContextThread, ReviewPhase,
    ReviewResult, ThreadStatus,
};
use reviewmaster::events::{Event, EventBus};
use reviewmaster::orchestrator::{ReviewOrchestrator, SubmitOutcome, ThreadSource};
use reviewmaster::progress::ProgressStore;
use reviewmaster::queue::{JobRunner, JobStatus};
use reviewmaster::tools::{ToolContext, ToolServer};
use reviewmaster::watcher::{ContextWatcher, ProgressCallback};
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};

use super::call_ok;

const CONTEXT_DIR: &str = ".reviewmaster/contexts";

/// Plays the agent process: works through its plan with tool calls, writes
/// the result, then waits for the test before exiting
struct ToolDrivenAgent {
    server: ToolServer,
    contexts: Arc<dyn ReviewContextStore>,
    blocking: u32,
    exit_gate: Arc<Semaphore>,
}

#[async_trait]
impl JobRunner for ToolDrivenAgent {
    async fn run(&self, job: Job) -> anyhow::Result<()> {
        let job_id = job.id.as_str();
        let workflow = call_ok(&self.server, "get_workflow", json!({ "jobId": job_id })).await;
        let agents: Vec<String> = workflow["agents"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|a| a["name"].as_str().map(str::to_string))
            .collect();

        call_ok(
            &self.server,
            "set_phase",
            json!({ "jobId": job_id, "phase": "agents-running" }),
        )
        .await;
        for agent in &agents {
            call_ok(
                &self.server,
                "start_agent",
                json!({ "jobId": job_id, "agentName": agent }),
            )
            .await;
            call_ok(
                &self.server,
                "complete_agent",
                json!({ "jobId": job_id, "agentName": agent, "status": "success" }),
            )
            .await;
        }

        call_ok(
            &self.server,
            "add_action",
            json!({ "jobId": job_id, "type": "THREAD_RESOLVE", "threadId": "d1" }),
        )
        .await;

        self.contexts
            .set_result(
                Path::new(&job.local_path),
                &job.merge_request_id(),
                ReviewResult {
                    blocking: self.blocking,
                    warnings: 2,
                    suggestions: 3,
                    score: if self.blocking > 0 { 5.5 } else { 8.5 },
                    verdict: "reviewed".to_string(),
                },
            )
            .await?;
        call_ok(
            &self.server,
            "set_phase",
            json!({ "jobId": job_id, "phase": "completed" }),
        )
        .await;

        self.exit_gate.acquire().await?.forget();
        Ok(())
    }
}

struct TwoThreads;

#[async_trait]
impl ThreadSource for TwoThreads {
    async fn fetch_threads(&self, _job: &Job) -> anyhow::Result<Vec<ReviewContextThread>> {
        Ok(["d1", "d2"]
            .into_iter()
            .map(|id| ReviewContextThread {
                id: id.to_string(),
                file: Some("src/handler.rs".to_string()),
                line: Some(7),
                status: ThreadStatus::Open,
                body: "Missing timeout".to_string(),
            })
            .collect())
    }
}

struct Harness {
    work: tempfile::TempDir,
    _data: tempfile::TempDir,
    orchestrator: ReviewOrchestrator,
    contexts: Arc<dyn ReviewContextStore>,
    registry: Arc<JobContextRegistry>,
    exit_gate: Arc<Semaphore>,
    bus: EventBus,
}

async fn harness(blocking: u32) -> Harness {
    let work = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let registry_path = data.path().join("job-contexts.json");

    let contexts: Arc<dyn ReviewContextStore> = Arc::new(FileContextStore::new(CONTEXT_DIR));
    let registry = Arc::new(JobContextRegistry::durable(&registry_path).await.unwrap());

    // The agent side gets its own registry handle on the same file
    let agent_registry = Arc::new(JobContextRegistry::durable(&registry_path).await.unwrap());
    let progress = ProgressStore::new();
    progress
        .subscribe(Arc::new(ContextSyncBridge::new(
            contexts.clone(),
            agent_registry.clone(),
        )))
        .await;
    let server = ToolServer::with_review_tools(ToolContext::new(
        progress,
        contexts.clone(),
        agent_registry,
        AgentPlansConfig::default(),
    ));

    let exit_gate = Arc::new(Semaphore::new(0));
    let agent = Arc::new(ToolDrivenAgent {
        server,
        contexts: contexts.clone(),
        blocking,
        exit_gate: exit_gate.clone(),
    });

    let bus = EventBus::new();
    let orchestrator = ReviewOrchestrator::new(
        QueueConfig::default(),
        AgentPlansConfig::default(),
        agent,
        contexts.clone(),
        registry.clone(),
        bus.clone(),
    )
    .with_thread_source(Arc::new(TwoThreads));

    Harness {
        work,
        _data: data,
        orchestrator,
        contexts,
        registry,
        exit_gate,
        bus,
    }
}

impl Harness {
    fn job(&self, job_type: JobType) -> Job {
        Job::new(
            Platform::Gitlab,
            job_type,
            "team/api",
            self.work.path().to_string_lossy().to_string(),
            42,
        )
    }

    fn watch(&self, job: &Job) -> (ContextWatcher, mpsc::UnboundedReceiver<ContextProgress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: ProgressCallback = Arc::new(move |p: ContextProgress| {
            let _ = tx.send(p);
        });
        let watcher = ContextWatcher::new(self.contexts.clone(), Duration::from_millis(10));
        watcher.start(self.work.path(), &job.merge_request_id(), callback);
        (watcher, rx)
    }

    async fn wait_for_job(&self, job: &Job) -> JobStatus {
        tokio::time::timeout(Duration::from_secs(5), self.orchestrator.queue().wait_idle())
            .await
            .unwrap();
        self.orchestrator.queue().get_job_status(&job.id).unwrap()
    }
}

async fn until_completed(rx: &mut mpsc::UnboundedReceiver<ContextProgress>) -> Vec<ContextProgress> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(p) = rx.recv().await {
            let done = p.phase == ReviewPhase::Completed;
            seen.push(p);
            if done {
                break;
            }
        }
    })
    .await
    .unwrap();
    seen
}

#[tokio::test]
async fn test_clean_review_moves_to_pending_approval() {
    let h = harness(0).await;
    let mut events = h.bus.subscribe();
    let job = h.job(JobType::Review);
    let (watcher, mut progress) = h.watch(&job);

    assert_eq!(h.orchestrator.submit(job.clone()).await.unwrap(), SubmitOutcome::Queued);
    assert_eq!(
        h.orchestrator.submit(job.clone()).await.unwrap(),
        SubmitOutcome::AlreadyActive
    );
    assert_eq!(h.registry.len().await, 1);

    let seen = until_completed(&mut progress).await;
    assert_eq!(seen.last().unwrap().steps_completed.len(), 8);

    h.exit_gate.add_permits(1);
    assert_eq!(h.wait_for_job(&job).await, JobStatus::Completed);

    let tracked = h.orchestrator.tracked_mr(&job.tracked_mr_id()).await.unwrap();
    assert_eq!(tracked.current_state(), MrState::PendingApproval);
    assert_eq!(tracked.latest_score(), Some(8.5));
    assert_eq!(tracked.open_threads, 1);
    assert_eq!(tracked.total_threads, 2);

    // bookkeeping released after publication
    assert!(!h.contexts.exists(h.work.path(), &job.merge_request_id()).await);
    assert!(h.registry.is_empty().await);
    assert!(!watcher.is_watching(&job.merge_request_id()));

    let mut state_changes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::MrStateChanged { to_state, .. } = event {
            state_changes.push(to_state);
        }
    }
    assert_eq!(state_changes, [MrState::PendingApproval]);
}

#[tokio::test]
async fn test_blocking_review_then_followup() {
    let h = harness(1).await;

    let review = h.job(JobType::Review);
    let (_watcher, mut progress) = h.watch(&review);
    h.orchestrator.submit(review.clone()).await.unwrap();
    until_completed(&mut progress).await;
    h.exit_gate.add_permits(1);
    assert_eq!(h.wait_for_job(&review).await, JobStatus::Completed);

    let mr_id = review.tracked_mr_id();
    assert_eq!(
        h.orchestrator.tracked_mr(&mr_id).await.unwrap().current_state(),
        MrState::PendingFix
    );

    // the followup reuses the merge request id with its own job id and plan
    let followup = h.job(JobType::Followup);
    assert_ne!(followup.id, review.id);
    let (_watcher, mut progress) = h.watch(&followup);
    h.orchestrator.submit(followup.clone()).await.unwrap();
    assert_eq!(
        h.orchestrator.tracked_mr(&mr_id).await.unwrap().current_state(),
        MrState::PendingReview
    );

    let seen = until_completed(&mut progress).await;
    assert_eq!(
        seen.last().unwrap().steps_completed,
        ["context", "verify", "scan", "threads", "report"]
    );
    h.exit_gate.add_permits(1);
    assert_eq!(h.wait_for_job(&followup).await, JobStatus::Completed);

    let tracked = h.orchestrator.tracked_mr(&mr_id).await.unwrap();
    assert_eq!(tracked.current_state(), MrState::PendingFix);
    assert_eq!(tracked.score_history.len(), 2);
}

#[tokio::test]
async fn test_cancel_releases_bookkeeping() {
    let h = harness(0).await;
    let job = h.job(JobType::Review);
    let (_watcher, mut progress) = h.watch(&job);

    h.orchestrator.submit(job.clone()).await.unwrap();
    until_completed(&mut progress).await;

    // the agent is parked on its exit gate
    assert!(h.orchestrator.cancel(&job).await);
    assert!(!h.orchestrator.queue().has_active_job(&job.id));
    assert!(!h.contexts.exists(h.work.path(), &job.merge_request_id()).await);
    assert!(h.registry.is_empty().await);
    assert!(!h.orchestrator.cancel(&job).await);

    // a later submit of the same job starts a fresh cycle
    assert_eq!(h.orchestrator.submit(job.clone()).await.unwrap(), SubmitOutcome::Queued);
    h.exit_gate.add_permits(1);
    assert_eq!(h.wait_for_job(&job).await, JobStatus::Completed);
}
