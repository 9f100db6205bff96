use async_trait::async_trait;

use muster_core::ids::WorkerId;
use muster_core::runtime::Runtime;
use muster_core::tools::{Tool, ToolError};

use crate::pool::WorkerPool;

/// Pure read of worker state through the registry — one worker or all.
pub struct AgentStatusTool {
    pool: WorkerPool,
}

impl AgentStatusTool {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Tool for AgentStatusTool {
    fn name(&self) -> &str {
        "agent_status"
    }

    fn description(&self) -> &str {
        "Check the status of one worker, or of every worker"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Worker id; omit for all workers"
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
        let rendered = match args["id"].as_str() {
            Some(id) => {
                let id = WorkerId::from_raw(id);
                match self
                    .pool
                    .get_status(&id)
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
                {
                    Some(worker) => serde_json::to_string_pretty(&worker)
                        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?,
                    None => format!("No such worker: {id}"),
                }
            }
            None => {
                let workers = self
                    .pool
                    .get_all_status()
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                serde_json::to_string_pretty(&workers)
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
            }
        };
        Ok(rendered)
    }
}
