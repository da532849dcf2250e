//! Tool protocol server
//!
//! A name to handler registry the review agent calls into. Every failure is
//! returned as a structured `ToolResult` with `isError` set, never as a panic
//! or transport error.

mod actions;
mod agents;
pub mod transport;
mod workflow;

pub use actions::{AddActionTool, GetThreadsTool};
pub use agents::{CompleteAgentTool, StartAgentTool};
pub use workflow::{GetWorkflowTool, SetPhaseTool};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AgentPlansConfig;
use crate::context::{JobContextEntry, JobContextRegistry, ReviewContextStore};
use crate::domain::{JobType, ReviewContext, ReviewProgress};
use crate::progress::ProgressStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResult {
    pub fn json(value: Value) -> Self {
        let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        Self {
            content: vec![ToolContent::Text { text }],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Concatenated text content
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, args: &Value) -> ToolResult;
}

/// Stores shared by the review tools
#[derive(Clone)]
pub struct ToolContext {
    pub progress: ProgressStore,
    pub contexts: Arc<dyn ReviewContextStore>,
    pub registry: Arc<JobContextRegistry>,
    pub agent_plans: AgentPlansConfig,
}

impl ToolContext {
    pub fn new(
        progress: ProgressStore,
        contexts: Arc<dyn ReviewContextStore>,
        registry: Arc<JobContextRegistry>,
        agent_plans: AgentPlansConfig,
    ) -> Self {
        Self {
            progress,
            contexts,
            registry,
            agent_plans,
        }
    }

    async fn job_context(&self, job_id: &str) -> Result<JobContextEntry, ToolResult> {
        self.registry
            .get(job_id)
            .await
            .ok_or_else(|| ToolResult::error(format!("Job context not found: {}", job_id)))
    }

    async fn review_context(&self, entry: &JobContextEntry) -> Result<ReviewContext, ToolResult> {
        match self
            .contexts
            .read(&entry.local_path, &entry.merge_request_id)
            .await
        {
            Ok(Some(context)) => Ok(context),
            Ok(None) => Err(ToolResult::error(format!(
                "Review context not found: {}",
                entry.merge_request_id
            ))),
            Err(e) => Err(ToolResult::error(e.to_string())),
        }
    }

    /// Progress for a job, initialised from its review context's agent plan
    /// when this process has not seen the job yet
    async fn ensure_progress(&self, job_id: &str) -> Result<ReviewProgress, ToolResult> {
        if let Some(progress) = self.progress.get_progress(job_id).await {
            return Ok(progress);
        }

        let entry = self.job_context(job_id).await?;
        let context = self.review_context(&entry).await?;
        let plan = match &context.agents {
            Some(agents) => agents.clone(),
            None => self
                .agent_plans
                .for_job_type(context.job_type.unwrap_or(JobType::Followup))
                .to_vec(),
        };

        tracing::info!("Initialising progress for job {} with {} agents", job_id, plan.len());
        Ok(self.progress.create_progress(job_id, &plan).await)
    }

    /// Like `ensure_progress`, but an unknown job reads as missing progress
    async fn existing_progress(&self, job_id: &str) -> Result<ReviewProgress, ToolResult> {
        if self.progress.get_progress(job_id).await.is_none()
            && self.registry.get(job_id).await.is_none()
        {
            return Err(ToolResult::error(format!("No progress found for job: {}", job_id)));
        }
        self.ensure_progress(job_id).await
    }
}

/// Name to tool registry
#[derive(Default)]
pub struct ToolServer {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server with every review tool registered
    pub fn with_review_tools(context: ToolContext) -> Self {
        let mut server = Self::new();
        server.register(Arc::new(GetWorkflowTool::new(context.clone())));
        server.register(Arc::new(StartAgentTool::new(context.clone())));
        server.register(Arc::new(CompleteAgentTool::new(context.clone())));
        server.register(Arc::new(SetPhaseTool::new(context.clone())));
        server.register(Arc::new(AddActionTool::new(context.clone())));
        server.register(Arc::new(GetThreadsTool::new(context)));
        server
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        self.tools.retain(|t| t.definition().name != name);
        self.tools.push(tool);
    }

    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub async fn call_tool(&self, name: &str, args: &Value) -> ToolResult {
        let Some(tool) = self.tools.iter().find(|t| t.definition().name == name) else {
            tracing::warn!("Unknown tool called: {}", name);
            return ToolResult::error(format!("Unknown tool: {}", name));
        };

        let result = tool.call(args).await;
        if result.is_error {
            tracing::debug!("Tool {} returned error: {}", name, result.text());
        }
        result
    }
}

/// A non-empty string argument
pub(crate) fn require_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, ToolResult> {
    optional_str(args, field).ok_or_else(|| {
        ToolResult::error(format!("Missing or invalid required field: {}", field))
    })
}

pub(crate) fn optional_str<'a>(args: &'a Value, field: &str) -> Option<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn job_id_schema() -> Value {
    serde_json::json!({
        "type": "string",
        "description": "Job id from the REVIEWMASTER_JOB_ID environment variable"
    })
}
