use async_trait::async_trait;
use serde_json::{json, Value};

use super::{job_id_schema, optional_str, require_str, Tool, ToolContext, ToolDefinition, ToolResult};
use crate::progress::AgentOutcome;

pub struct StartAgentTool {
    context: ToolContext,
}

impl StartAgentTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for StartAgentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "start_agent".to_string(),
            description: "Mark a review agent as running".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "jobId": job_id_schema(),
                    "agentName": { "type": "string" }
                },
                "required": ["jobId", "agentName"]
            }),
        }
    }

    async fn call(&self, args: &Value) -> ToolResult {
        let job_id = match require_str(args, "jobId") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let agent_name = match require_str(args, "agentName") {
            Ok(v) => v,
            Err(resp) => return resp,
        };

        let progress = match self.context.existing_progress(job_id).await {
            Ok(p) => p,
            Err(resp) => return resp,
        };
        if progress.agent(agent_name).is_none() {
            return ToolResult::error(format!("Agent not found: {}", agent_name));
        }

        let Some(progress) = self.context.progress.start_agent(job_id, agent_name).await else {
            return ToolResult::error(format!("Agent not found: {}", agent_name));
        };
        let started_at = progress
            .agent(agent_name)
            .and_then(|a| a.started_at)
            .map(|t| t.to_rfc3339());

        ToolResult::json(json!({
            "agentName": agent_name,
            "startedAt": started_at,
            "overallProgress": progress.overall_progress,
        }))
    }
}

pub struct CompleteAgentTool {
    context: ToolContext,
}

impl CompleteAgentTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

fn parse_outcome(raw: &str) -> Option<AgentOutcome> {
    match raw {
        "success" => Some(AgentOutcome::Success),
        "failed" => Some(AgentOutcome::Failed),
        _ => None,
    }
}

#[async_trait]
impl Tool for CompleteAgentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "complete_agent".to_string(),
            description: "Mark a review agent as finished, successfully or with an error".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "jobId": job_id_schema(),
                    "agentName": { "type": "string" },
                    "status": { "type": "string", "enum": ["success", "failed"] },
                    "error": { "type": "string" }
                },
                "required": ["jobId", "agentName", "status"]
            }),
        }
    }

    async fn call(&self, args: &Value) -> ToolResult {
        let job_id = match require_str(args, "jobId") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let agent_name = match require_str(args, "agentName") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let raw_status = match require_str(args, "status") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let Some(outcome) = parse_outcome(raw_status) else {
            return ToolResult::error(format!(
                "Invalid status: {}. Must be one of: success, failed",
                raw_status
            ));
        };
        let error = optional_str(args, "error").map(str::to_string);

        let progress = match self.context.existing_progress(job_id).await {
            Ok(p) => p,
            Err(resp) => return resp,
        };
        if progress.agent(agent_name).is_none() {
            return ToolResult::error(format!("Agent not found: {}", agent_name));
        }

        let Some(progress) = self
            .context
            .progress
            .complete_agent(job_id, agent_name, outcome, error.clone())
            .await
        else {
            return ToolResult::error(format!("Agent not found: {}", agent_name));
        };
        let completed_at = progress
            .agent(agent_name)
            .and_then(|a| a.completed_at)
            .map(|t| t.to_rfc3339());

        let mut body = json!({
            "agentName": agent_name,
            "status": raw_status,
            "completedAt": completed_at,
            "overallProgress": progress.overall_progress,
        });
        if let (Some(error), Some(obj)) = (error, body.as_object_mut()) {
            obj.insert("error".to_string(), Value::String(error));
        }
        ToolResult::json(body)
    }
}
