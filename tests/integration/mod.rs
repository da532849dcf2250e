//! Integration tests for reviewmaster
//!
//! These drive the tool server over its JSON-RPC surface against file-backed
//! stores, the way an agent process and the orchestrator share them.

mod orchestrator_flow;
mod tool_session;

use reviewmaster::tools::{transport::handle_line, ToolServer};
use serde_json::{json, Value};

/// Call a tool over JSON-RPC and return the raw `tools/call` result
pub async fn call_tool(server: &ToolServer, name: &str, arguments: Value) -> Value {
    let request = json!({
        "jsonrpc": "2.0",
        "id": name,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments },
    });
    let response = handle_line(server, &request.to_string())
        .await
        .expect("tools/call always answers");
    assert!(response.get("error").is_none(), "protocol error: {}", response);
    response["result"].clone()
}

/// Call a tool that is expected to succeed and decode its JSON payload
pub async fn call_ok(server: &ToolServer, name: &str, arguments: Value) -> Value {
    let result = call_tool(server, name, arguments).await;
    assert!(result.get("isError").is_none(), "{} failed: {}", name, result);
    let text = result["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}
