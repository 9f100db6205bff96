use muster_core::errors::ModelError;
use muster_core::runtime::RuntimeError;
use muster_core::tools::ToolError;
use muster_registry::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("aborted")]
    Aborted,

    #[error("{0}")]
    Internal(String),
}
