//! Review context document shared with the out-of-process agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AgentDefinition, JobType, Platform, ReviewPhase};

/// Current document format version
pub const CONTEXT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Open,
    Resolved,
}

/// Discussion thread snapshot taken when the context is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewContextThread {
    pub id: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub status: ThreadStatus,
    pub body: String,
}

/// Action requested by the agent, to be carried out when results are published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ActionKind {
    #[serde(rename = "THREAD_RESOLVE", rename_all = "camelCase")]
    ThreadResolve {
        thread_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "THREAD_REPLY", rename_all = "camelCase")]
    ThreadReply { thread_id: String, message: String },
    #[serde(rename = "POST_COMMENT")]
    PostComment { body: String },
    #[serde(rename = "ADD_LABEL")]
    AddLabel { label: String },
}

impl ActionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ActionKind::ThreadResolve { .. } => "THREAD_RESOLVE",
            ActionKind::ThreadReply { .. } => "THREAD_REPLY",
            ActionKind::PostComment { .. } => "POST_COMMENT",
            ActionKind::AddLabel { .. } => "ADD_LABEL",
        }
    }
}

/// An entry in the append-only action log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewContextAction {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl ReviewContextAction {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            kind,
        }
    }
}

/// Progress mirror written by the agent and by the sync bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextProgress {
    pub phase: ReviewPhase,
    pub current_step: Option<String>,
    #[serde(default)]
    pub steps_completed: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl ContextProgress {
    pub fn initial() -> Self {
        Self {
            phase: ReviewPhase::Initializing,
            current_step: None,
            steps_completed: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Final outcome of a review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    pub blocking: u32,
    pub warnings: u32,
    pub suggestions: u32,
    pub score: f64,
    pub verdict: String,
}

impl ReviewResult {
    pub fn has_blocking(&self) -> bool {
        self.blocking > 0
    }
}

/// The durable document a review agent communicates through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewContext {
    pub version: u32,
    pub merge_request_id: String,
    pub platform: Platform,
    pub project_path: String,
    pub merge_request_number: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<JobType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<AgentDefinition>>,
    #[serde(default)]
    pub threads: Vec<ReviewContextThread>,
    #[serde(default)]
    pub actions: Vec<ReviewContextAction>,
    pub progress: ContextProgress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ReviewResult>,
}

impl ReviewContext {
    pub fn new(
        merge_request_id: impl Into<String>,
        platform: Platform,
        project_path: impl Into<String>,
        merge_request_number: u64,
    ) -> Self {
        Self {
            version: CONTEXT_VERSION,
            merge_request_id: merge_request_id.into(),
            platform,
            project_path: project_path.into(),
            merge_request_number,
            created_at: Utc::now(),
            job_type: None,
            agents: None,
            threads: Vec::new(),
            actions: Vec::new(),
            progress: ContextProgress::initial(),
            result: None,
        }
    }

    pub fn with_job_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    pub fn with_agents(mut self, agents: Vec<AgentDefinition>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn with_threads(mut self, threads: Vec<ReviewContextThread>) -> Self {
        self.threads = threads;
        self
    }

    /// Effective status of a thread: the snapshot, overridden by any
    /// THREAD_RESOLVE in the action log
    pub fn thread_status(&self, thread_id: &str) -> Option<ThreadStatus> {
        let thread = self.threads.iter().find(|t| t.id == thread_id)?;
        let resolved = self.actions.iter().any(|a| {
            matches!(&a.kind, ActionKind::ThreadResolve { thread_id: id, .. } if id == thread_id)
        });

        Some(if resolved {
            ThreadStatus::Resolved
        } else {
            thread.status
        })
    }

    /// Threads with their effective status applied
    pub fn effective_threads(&self) -> Vec<ReviewContextThread> {
        self.threads
            .iter()
            .map(|t| {
                let mut thread = t.clone();
                if let Some(status) = self.thread_status(&t.id) {
                    thread.status = status;
                }
                thread
            })
            .collect()
    }

    pub fn open_thread_count(&self) -> usize {
        self.effective_threads()
            .iter()
            .filter(|t| t.status == ThreadStatus::Open)
            .count()
    }

    pub fn is_completed(&self) -> bool {
        self.progress.phase == ReviewPhase::Completed
    }
}
