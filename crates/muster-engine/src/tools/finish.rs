use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use muster_core::messages::Message;
use muster_core::provider::ModelClient;
use muster_core::runtime::Runtime;
use muster_core::tools::{Tool, ToolError};

use crate::pool::WorkerPool;
use crate::prompts;

/// The terminal crew tool: waits for every worker to settle, then asks the
/// model to synthesize their findings into the final report. The tokens
/// spent on synthesis are tracked here and drained by the orchestrator
/// after a successful finish.
pub struct FinishTool {
    pool: WorkerPool,
    client: Arc<dyn ModelClient>,
    synthesis_tokens: AtomicU64,
}

impl FinishTool {
    pub fn new(pool: WorkerPool, client: Arc<dyn ModelClient>) -> Self {
        Self {
            pool,
            client,
            synthesis_tokens: AtomicU64::new(0),
        }
    }

    /// Read and reset the synthesis token counter.
    pub fn take_tokens(&self) -> u64 {
        self.synthesis_tokens.swap(0, Ordering::Relaxed)
    }
}

#[async_trait]
impl Tool for FinishTool {
    fn name(&self) -> &str {
        super::FINISH_TOOL
    }

    fn description(&self) -> &str {
        "Collect all worker results and produce the final report; ends the run"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "context": {
                    "type": "string",
                    "description": "Any additional context to fold into the report"
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
        let context = args["context"].as_str().unwrap_or_default();

        let results = self
            .pool
            .wait_for(None)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let prompt = prompts::synthesis_prompt(context, &results);
        let completion = self
            .client
            .generate(prompts::SYNTHESIS_SYSTEM, &[Message::user_text(prompt)], &[])
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        if let Some(usage) = &completion.usage {
            self.synthesis_tokens
                .fetch_add(usage.total(), Ordering::Relaxed);
        }

        let report = completion.text().trim().to_string();
        if report.is_empty() {
            return Err(ToolError::ExecutionFailed(
                "synthesis produced an empty report".into(),
            ));
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerConfig;
    use crate::registry::ToolRegistry;
    use crate::sandbox::{LocalRuntime, LocalRuntimeFactory, RuntimeFactory};
    use muster_core::errors::ModelError;
    use muster_core::events::NullSink;
    use muster_core::ids::ProjectId;
    use muster_llm::{MockClient, MockCompletion};
    use muster_registry::{CrewRegistry, MemoryStore};

    fn pool(responses: Vec<MockCompletion>) -> WorkerPool {
        let factory: Arc<dyn RuntimeFactory> =
            Arc::new(LocalRuntimeFactory::new(std::env::temp_dir()));
        WorkerPool::new(
            Arc::new(MockClient::new(responses)),
            Arc::new(ToolRegistry::new()),
            factory,
            CrewRegistry::new(Arc::new(MemoryStore::new())),
            ProjectId::from_raw("proj_finish_tool"),
            "example.com",
            Arc::new(NullSink),
            WorkerConfig::default(),
        )
    }

    #[tokio::test]
    async fn synthesizes_report_from_worker_results() {
        let pool = pool(vec![MockCompletion::text("22/tcp open ssh")]);
        pool.spawn("port scan", 1, vec![]).await.unwrap();

        let synth = Arc::new(MockClient::new(vec![MockCompletion::text_with_usage(
            "Final report: one open port.",
            321,
        )]));
        let tool = FinishTool::new(pool, synth);
        let runtime = LocalRuntime::new(std::env::temp_dir());

        let report = tool
            .execute(serde_json::json!({"context": "wrap up"}), &runtime)
            .await
            .unwrap();

        assert_eq!(report, "Final report: one open port.");
        assert_eq!(tool.take_tokens(), 321);
        // Drained after the first read.
        assert_eq!(tool.take_tokens(), 0);
    }

    #[tokio::test]
    async fn synthesis_failure_surfaces_as_tool_error() {
        let tool = FinishTool::new(
            pool(vec![]),
            Arc::new(MockClient::new(vec![MockCompletion::Error(
                ModelError::Overloaded,
            )])),
        );
        let runtime = LocalRuntime::new(std::env::temp_dir());
        let result = tool.execute(serde_json::json!({}), &runtime).await;
        assert!(matches!(result, Err(ToolError::ExecutionFailed(_))));
    }

    #[tokio::test]
    async fn empty_synthesis_is_an_error() {
        let tool = FinishTool::new(
            pool(vec![]),
            Arc::new(MockClient::new(vec![MockCompletion::text("")])),
        );
        let runtime = LocalRuntime::new(std::env::temp_dir());
        let result = tool.execute(serde_json::json!({}), &runtime).await;
        assert!(result.is_err());
    }

    #[test]
    fn not_cacheable() {
        let tool = FinishTool::new(pool(vec![]), Arc::new(MockClient::new(vec![])));
        assert!(!tool.cacheable());
    }
}
