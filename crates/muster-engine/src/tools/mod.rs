pub mod finish;
pub mod report_step;
pub mod shell;
pub mod spawn;
pub mod status;
pub mod wait;

use std::sync::Arc;

use muster_core::provider::ModelClient;

use crate::pool::WorkerPool;
use crate::registry::ToolRegistry;

pub use finish::FinishTool;

/// Name of the terminal crew tool. A successful execution of it is the
/// sole terminal signal of an orchestrator run.
pub const FINISH_TOOL: &str = "finish";

/// The base toolset every worker gets.
pub fn worker_toolset() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(shell::ShellTool::new()));
    registry.register(Arc::new(report_step::ReportStepTool));
    registry
}

/// The orchestrator's toolset: the base tools plus the pool controls and
/// the terminal finish tool. The typed `FinishTool` handle is returned
/// alongside so the orchestrator can read synthesis token counts.
pub fn crew_toolset(
    base: &ToolRegistry,
    pool: WorkerPool,
    client: Arc<dyn ModelClient>,
) -> (ToolRegistry, Arc<FinishTool>) {
    let mut registry = base.clone();
    registry.register(Arc::new(spawn::SpawnAgentTool::new(pool.clone())));
    registry.register(Arc::new(wait::WaitForAgentsTool::new(pool.clone())));
    registry.register(Arc::new(status::AgentStatusTool::new(pool.clone())));

    let finish = Arc::new(FinishTool::new(pool, client));
    registry.register(finish.clone());
    (registry, finish)
}
