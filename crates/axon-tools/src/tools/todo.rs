//! manage_todo_list - the plan-tracking tool the LLM calls
//!
//! The tool is idempotent: each invocation carries the complete desired
//! list (title plus every item with its status), never a diff. The agent
//! loop intercepts calls to this name and routes them to the todo
//! service; the fallback execute below only answers when the tool is
//! invoked directly (e.g. in tests).

use crate::registry::Tool;
use axon_core::Result;
use serde_json::Value;

pub const MANAGE_TODO_LIST: &str = "manage_todo_list";

pub struct ManageTodoListTool;

#[async_trait::async_trait]
impl Tool for ManageTodoListTool {
    fn name(&self) -> &str {
        MANAGE_TODO_LIST
    }

    fn description(&self) -> &str {
        "Create or update a task progress list. Call this whenever you start \
         a multi-step task. Send the COMPLETE list every time (not a diff). \
         Statuses: pending (not started), running (currently executing), \
         completed (finished). Only ONE item should be 'running' at a time."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Short title describing the overall task"
                },
                "items": {
                    "type": "array",
                    "description": "Complete ordered list of todo items",
                    "items": {
                        "type": "object",
                        "properties": {
                            "label": {
                                "type": "string",
                                "description": "Short description of this step"
                            },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "running", "completed"],
                                "description": "Current status"
                            }
                        },
                        "required": ["label", "status"]
                    }
                }
            },
            "required": ["title", "items"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let title = args.get("title").and_then(Value::as_str).unwrap_or("");
        let count = args
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        Ok(serde_json::json!({
            "ok": true,
            "message": format!("Todo list '{title}' accepted with {count} items."),
        })
        .to_string())
    }
}
