use async_trait::async_trait;
use serde_json::{json, Value};

use super::{job_id_schema, require_str, Tool, ToolContext, ToolDefinition, ToolResult};
use crate::domain::ReviewPhase;

const WORKFLOW_INSTRUCTIONS: &str = "\
Run the agents below in order. For each agent:
1. Call start_agent with the jobId and the agent name.
2. Perform that agent's review.
3. Call complete_agent with status \"success\", or \"failed\" and an error message.
Use set_phase to move through initializing, agents-running, synthesizing, publishing and completed.
Record follow-up work with add_action (THREAD_RESOLVE, THREAD_REPLY, POST_COMMENT, ADD_LABEL).
Call get_threads to see the discussion threads of the merge request.";

pub struct GetWorkflowTool {
    context: ToolContext,
}

impl GetWorkflowTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for GetWorkflowTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_workflow".to_string(),
            description: "Get the ordered agent plan, agent statuses and calling instructions for a review job"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "jobId": job_id_schema() },
                "required": ["jobId"]
            }),
        }
    }

    async fn call(&self, args: &Value) -> ToolResult {
        let job_id = match require_str(args, "jobId") {
            Ok(v) => v,
            Err(resp) => return resp,
        };

        let progress = match self.context.ensure_progress(job_id).await {
            Ok(p) => p,
            Err(resp) => return resp,
        };

        let agents: Vec<Value> = progress
            .agents
            .iter()
            .map(|a| {
                json!({
                    "name": a.name,
                    "displayName": a.display_name,
                    "status": a.status,
                })
            })
            .collect();

        ToolResult::json(json!({
            "jobId": job_id,
            "agents": agents,
            "instructions": WORKFLOW_INSTRUCTIONS,
            "currentState": {
                "phase": progress.current_phase,
                "overallProgress": progress.overall_progress,
            },
        }))
    }
}

pub struct SetPhaseTool {
    context: ToolContext,
}

impl SetPhaseTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for SetPhaseTool {
    fn definition(&self) -> ToolDefinition {
        let phases: Vec<&str> = ReviewPhase::ALL.iter().map(|p| p.as_str()).collect();
        ToolDefinition {
            name: "set_phase".to_string(),
            description: "Set the current review phase".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "jobId": job_id_schema(),
                    "phase": { "type": "string", "enum": phases }
                },
                "required": ["jobId", "phase"]
            }),
        }
    }

    async fn call(&self, args: &Value) -> ToolResult {
        let job_id = match require_str(args, "jobId") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let raw_phase = match require_str(args, "phase") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let Ok(phase) = raw_phase.parse::<ReviewPhase>() else {
            let phases: Vec<&str> = ReviewPhase::ALL.iter().map(|p| p.as_str()).collect();
            return ToolResult::error(format!(
                "Invalid phase: {}. Must be one of: {}",
                raw_phase,
                phases.join(", ")
            ));
        };

        if let Err(resp) = self.context.existing_progress(job_id).await {
            return resp;
        }

        match self.context.progress.set_phase(job_id, phase).await {
            Some(progress) => ToolResult::json(json!({
                "phase": progress.current_phase,
                "overallProgress": progress.overall_progress,
            })),
            None => ToolResult::error(format!("No progress found for job: {}", job_id)),
        }
    }
}
