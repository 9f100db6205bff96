use async_trait::async_trait;

use muster_core::ids::WorkerId;
use muster_core::runtime::Runtime;
use muster_core::tools::{Tool, ToolError};

use crate::pool::WorkerPool;

/// Delegates a sub-task to a new worker agent in the pool. Returns
/// immediately with the worker id; results are collected later with
/// `wait_for_agents` or `finish`.
pub struct SpawnAgentTool {
    pool: WorkerPool,
}

impl SpawnAgentTool {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Spawn a worker agent for one sub-task; returns its id immediately"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["task"],
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The sub-task for the worker"
                },
                "priority": {
                    "type": "integer",
                    "description": "Advisory priority, higher first (default 1)"
                },
                "depends_on": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Worker ids that should settle before this one starts"
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
        let task = args["task"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("task is required".into()))?;

        let priority = args["priority"].as_i64().unwrap_or(1) as i32;

        let depends_on: Vec<WorkerId> = args["depends_on"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(WorkerId::from_raw)
                    .collect()
            })
            .unwrap_or_default();

        let id = self
            .pool
            .spawn(task, priority, depends_on)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(format!("Spawned {id}: {task}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerConfig;
    use crate::registry::ToolRegistry;
    use crate::sandbox::{LocalRuntime, LocalRuntimeFactory, RuntimeFactory};
    use muster_core::events::NullSink;
    use muster_core::ids::ProjectId;
    use muster_llm::{MockClient, MockCompletion};
    use muster_registry::{CrewRegistry, MemoryStore};
    use std::sync::Arc;

    fn pool(responses: Vec<MockCompletion>) -> WorkerPool {
        let factory: Arc<dyn RuntimeFactory> =
            Arc::new(LocalRuntimeFactory::new(std::env::temp_dir()));
        WorkerPool::new(
            Arc::new(MockClient::new(responses)),
            Arc::new(ToolRegistry::new()),
            factory,
            CrewRegistry::new(Arc::new(MemoryStore::new())),
            ProjectId::from_raw("proj_spawn_tool"),
            "example.com",
            Arc::new(NullSink),
            WorkerConfig::default(),
        )
    }

    #[tokio::test]
    async fn spawns_and_reports_id() {
        let pool = pool(vec![MockCompletion::text("done")]);
        let tool = SpawnAgentTool::new(pool.clone());
        let runtime = LocalRuntime::new(std::env::temp_dir());

        let out = tool
            .execute(serde_json::json!({"task": "scan ports"}), &runtime)
            .await
            .unwrap();

        assert!(out.contains("worker-0"));
        pool.wait_for(None).await.unwrap();
    }

    #[tokio::test]
    async fn parses_dependencies() {
        let pool = pool(vec![
            MockCompletion::text("a"),
            MockCompletion::text("b"),
        ]);
        let tool = SpawnAgentTool::new(pool.clone());
        let runtime = LocalRuntime::new(std::env::temp_dir());

        tool.execute(serde_json::json!({"task": "first"}), &runtime)
            .await
            .unwrap();
        tool.execute(
            serde_json::json!({"task": "second", "depends_on": ["worker-0"], "priority": 3}),
            &runtime,
        )
        .await
        .unwrap();

        pool.wait_for(None).await.unwrap();
        let worker = pool
            .get_status(&WorkerId::from_raw("worker-1"))
            .unwrap()
            .unwrap();
        assert_eq!(worker.depends_on, vec![WorkerId::from_raw("worker-0")]);
        assert_eq!(worker.priority, 3);
    }

    #[tokio::test]
    async fn missing_task_is_invalid() {
        let tool = SpawnAgentTool::new(pool(vec![]));
        let runtime = LocalRuntime::new(std::env::temp_dir());
        let result = tool.execute(serde_json::json!({}), &runtime).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[test]
    fn not_cacheable() {
        assert!(!SpawnAgentTool::new(pool(vec![])).cacheable());
    }
}
