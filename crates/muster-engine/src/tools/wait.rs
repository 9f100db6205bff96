use async_trait::async_trait;

use muster_core::ids::WorkerId;
use muster_core::runtime::Runtime;
use muster_core::tools::{Tool, ToolError};

use crate::pool::WorkerPool;

/// Blocks until the named workers (or all of them) settle, then returns
/// their authoritative summaries as JSON.
pub struct WaitForAgentsTool {
    pool: WorkerPool,
}

impl WaitForAgentsTool {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Tool for WaitForAgentsTool {
    fn name(&self) -> &str {
        "wait_for_agents"
    }

    fn description(&self) -> &str {
        "Wait for workers to finish and return their results"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ids": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Worker ids to wait for; omit to wait for all"
                }
            }
        })
    }

    fn cacheable(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _runtime: &dyn Runtime,
    ) -> Result<String, ToolError> {
        let ids: Option<Vec<WorkerId>> = args["ids"].as_array().map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(WorkerId::from_raw)
                .collect()
        });

        let results = self
            .pool
            .wait_for(ids)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        serde_json::to_string_pretty(&results)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))
    }
}
