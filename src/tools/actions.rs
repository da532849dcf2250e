use async_trait::async_trait;
use serde_json::{json, Value};

use super::{job_id_schema, optional_str, require_str, Tool, ToolContext, ToolDefinition, ToolResult};
use crate::domain::ActionKind;

const ACTION_TYPES: [&str; 4] = ["THREAD_RESOLVE", "THREAD_REPLY", "POST_COMMENT", "ADD_LABEL"];

/// Build the typed action from flat arguments, validating type-specific fields
fn parse_action(args: &Value) -> Result<ActionKind, ToolResult> {
    let action_type = require_str(args, "type")?;
    let thread_id = optional_str(args, "threadId").map(str::to_string);
    let message = optional_str(args, "message").map(str::to_string);

    match action_type {
        "THREAD_RESOLVE" => {
            let thread_id =
                thread_id.ok_or_else(|| ToolResult::error("THREAD_RESOLVE requires threadId"))?;
            Ok(ActionKind::ThreadResolve { thread_id, message })
        }
        "THREAD_REPLY" => match (thread_id, message) {
            (Some(thread_id), Some(message)) => Ok(ActionKind::ThreadReply { thread_id, message }),
            _ => Err(ToolResult::error("THREAD_REPLY requires threadId and message")),
        },
        "POST_COMMENT" => {
            let body = optional_str(args, "body")
                .ok_or_else(|| ToolResult::error("POST_COMMENT requires body"))?;
            Ok(ActionKind::PostComment {
                body: body.to_string(),
            })
        }
        "ADD_LABEL" => {
            let label = optional_str(args, "label")
                .ok_or_else(|| ToolResult::error("ADD_LABEL requires label"))?;
            Ok(ActionKind::AddLabel {
                label: label.to_string(),
            })
        }
        other => Err(ToolResult::error(format!(
            "Invalid action type: {}. Must be one of: {}",
            other,
            ACTION_TYPES.join(", ")
        ))),
    }
}

pub struct AddActionTool {
    context: ToolContext,
}

impl AddActionTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for AddActionTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "add_action".to_string(),
            description: "Queue an action to perform on the merge request when the review is published"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "jobId": job_id_schema(),
                    "type": { "type": "string", "enum": ACTION_TYPES },
                    "threadId": { "type": "string", "description": "THREAD_RESOLVE, THREAD_REPLY" },
                    "message": { "type": "string", "description": "THREAD_REPLY, optional for THREAD_RESOLVE" },
                    "body": { "type": "string", "description": "POST_COMMENT" },
                    "label": { "type": "string", "description": "ADD_LABEL" }
                },
                "required": ["jobId", "type"]
            }),
        }
    }

    async fn call(&self, args: &Value) -> ToolResult {
        let job_id = match require_str(args, "jobId") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let kind = match parse_action(args) {
            Ok(kind) => kind,
            Err(resp) => return resp,
        };

        let entry = match self.context.job_context(job_id).await {
            Ok(entry) => entry,
            Err(resp) => return resp,
        };

        match self
            .context
            .contexts
            .append_action(&entry.local_path, &entry.merge_request_id, kind)
            .await
        {
            Ok(action) => {
                tracing::info!(
                    "Recorded {} action {} for {}",
                    action.kind.type_name(),
                    action.id,
                    entry.merge_request_id
                );
                ToolResult::json(json!({
                    "actionId": action.id,
                    "actionType": action.kind.type_name(),
                }))
            }
            Err(e) => {
                if !e.is_not_found() {
                    tracing::warn!("Failed to append action for job {}: {}", job_id, e);
                }
                ToolResult::error(e.to_string())
            }
        }
    }
}

pub struct GetThreadsTool {
    context: ToolContext,
}

impl GetThreadsTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for GetThreadsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_threads".to_string(),
            description: "List the merge request's discussion threads with their current status"
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
        let entry = match self.context.job_context(job_id).await {
            Ok(entry) => entry,
            Err(resp) => return resp,
        };
        let review = match self.context.review_context(&entry).await {
            Ok(review) => review,
            Err(resp) => return resp,
        };

        let threads = review.effective_threads();
        ToolResult::json(json!({
            "count": threads.len(),
            "threads": threads,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::*;
    use std::path::Path;

    async fn actions_in_document(ctx: &ToolContext) -> usize {
        ctx.contexts
            .read(Path::new("/work/p"), MR_ID)
            .await
            .unwrap()
            .unwrap()
            .actions
            .len()
    }

    #[tokio::test]
    async fn test_thread_resolve_without_thread_id_is_rejected() {
        let ctx = tool_context(None).await;
        let tool = AddActionTool::new(ctx.clone());

        let result = tool
            .call(&json!({ "jobId": JOB_ID, "type": "THREAD_RESOLVE" }))
            .await;
        assert!(result.is_error);
        assert_eq!(result.text(), "THREAD_RESOLVE requires threadId");
        assert_eq!(actions_in_document(&ctx).await, 0);
    }

    #[tokio::test]
    async fn test_type_specific_validation() {
        let ctx = tool_context(None).await;
        let tool = AddActionTool::new(ctx.clone());

        let cases = [
            (json!({ "jobId": JOB_ID, "type": "THREAD_REPLY", "threadId": "t1" }), "THREAD_REPLY requires threadId and message"),
            (json!({ "jobId": JOB_ID, "type": "POST_COMMENT" }), "POST_COMMENT requires body"),
            (json!({ "jobId": JOB_ID, "type": "ADD_LABEL", "label": "" }), "ADD_LABEL requires label"),
            (json!({ "jobId": JOB_ID }), "Missing or invalid required field: type"),
            (
                json!({ "jobId": JOB_ID, "type": "MERGE" }),
                "Invalid action type: MERGE. Must be one of: THREAD_RESOLVE, THREAD_REPLY, POST_COMMENT, ADD_LABEL",
            ),
        ];
        for (args, expected) in cases {
            let result = tool.call(&args).await;
            assert!(result.is_error);
            assert_eq!(result.text(), expected);
        }
        assert_eq!(actions_in_document(&ctx).await, 0);
    }

    #[tokio::test]
    async fn test_add_action_appends_in_order() {
        let ctx = tool_context(None).await;
        let tool = AddActionTool::new(ctx.clone());

        let first = payload(
            &tool
                .call(&json!({ "jobId": JOB_ID, "type": "THREAD_REPLY", "threadId": "t1", "message": "Fixed in abc123" }))
                .await,
        );
        assert_eq!(first["actionType"], "THREAD_REPLY");
        assert!(first["actionId"].is_string());

        payload(
            &tool
                .call(&json!({ "jobId": JOB_ID, "type": "POST_COMMENT", "body": "Summary" }))
                .await,
        );

        let doc = ctx
            .contexts
            .read(Path::new("/work/p"), MR_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.actions.len(), 2);
        assert_eq!(doc.actions[0].id, first["actionId"].as_str().unwrap());
        assert_eq!(doc.actions[1].kind.type_name(), "POST_COMMENT");
    }

    #[tokio::test]
    async fn test_add_action_unknown_job() {
        let tool = AddActionTool::new(tool_context(None).await);
        let result = tool
            .call(&json!({ "jobId": "gitlab:x/y:1", "type": "ADD_LABEL", "label": "bug" }))
            .await;
        assert_eq!(result.text(), "Job context not found: gitlab:x/y:1");
    }

    #[tokio::test]
    async fn test_get_threads_reflects_resolutions() {
        let ctx = tool_context(None).await;
        let add = AddActionTool::new(ctx.clone());
        let threads = GetThreadsTool::new(ctx);

        let body = payload(&threads.call(&json!({ "jobId": JOB_ID })).await);
        assert_eq!(body["count"], 2);
        assert_eq!(body["threads"][0]["status"], "open");
        assert_eq!(body["threads"][0]["file"], "src/app.ts");

        payload(
            &add.call(&json!({ "jobId": JOB_ID, "type": "THREAD_RESOLVE", "threadId": "t1" }))
                .await,
        );

        let body = payload(&threads.call(&json!({ "jobId": JOB_ID })).await);
        assert_eq!(body["threads"][0]["status"], "resolved");
        assert_eq!(body["threads"][1]["status"], "open");
    }

    #[tokio::test]
    async fn test_get_threads_missing_document() {
        let ctx = tool_context(None).await;
        ctx.contexts.delete(Path::new("/work/p"), MR_ID).await.unwrap();

        let result = GetThreadsTool::new(ctx).call(&json!({ "jobId": JOB_ID })).await;
        assert_eq!(result.text(), format!("Review context not found: {}", MR_ID));
    }
}
