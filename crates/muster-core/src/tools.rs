use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::runtime::{Runtime, RuntimeError};

/// Tool definition sent to the model as part of the request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Trait implemented by each tool. Execution runs against the calling
/// agent's runtime and returns the raw output string; failures are captured
/// by the caller, never re-thrown into the loop.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether results may be served from the tool-result cache. Crew
    /// control tools opt out: deduplicating a spawn would drop workers.
    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        runtime: &dyn Runtime,
    ) -> Result<String, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}
