//! Current date/time tool

use crate::registry::Tool;
use axon_core::{Error, Result};
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::Value;

pub struct DateTimeTool;

#[async_trait::async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "get_datetime"
    }

    fn description(&self) -> &str {
        "Get the current date and time"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "Timezone (e.g., 'UTC', 'Asia/Shanghai')"
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let timezone = args
            .get("timezone")
            .and_then(Value::as_str)
            .unwrap_or("UTC");

        let tz: Tz = timezone
            .parse()
            .map_err(|_| Error::tool("get_datetime", format!("unknown timezone '{timezone}'")))?;

        Ok(Utc::now()
            .with_timezone(&tz)
            .format("%Y-%m-%d %H:%M:%S %Z")
            .to_string())
    }
}
