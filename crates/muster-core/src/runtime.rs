use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of a command executed inside a sandbox.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Status of one step of a worker's structured plan.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Complete,
    Skip,
    Fail,
}

impl StepStatus {
    /// Marker used when rendering plan histories.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Complete => "✓",
            Self::Skip => "⊘",
            Self::Fail => "✗",
        }
    }
}

/// One labeled unit of a worker's execution plan. Skip and failure reasons
/// live in `result`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    pub status: StepStatus,
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Render the steps that carry information, one labeled line each.
    /// Skips and failures are kept — they are valuable context.
    pub fn render(&self) -> Option<String> {
        let lines: Vec<String> = self
            .steps
            .iter()
            .filter(|s| s.result.is_some())
            .map(|s| {
                let info = s.result.as_deref().unwrap_or("No details");
                format!("{} {}: {}", s.status.marker(), s.description, info)
            })
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to start sandbox: {0}")]
    StartFailed(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("sandbox is not running")]
    NotRunning,
    #[error("unsupported action: {0}")]
    Unsupported(String),
}

/// An isolated execution context a worker's tool calls run against —
/// a local shell, an ephemeral container, or anything else that can run
/// commands. Workers never share a runtime instance.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Human-readable descriptor injected into system prompts.
    fn environment(&self) -> String;

    async fn start(&self) -> Result<(), RuntimeError>;
    async fn stop(&self) -> Result<(), RuntimeError>;

    async fn execute_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, RuntimeError>;

    async fn browser_action(
        &self,
        action: &str,
        _args: &serde_json::Value,
    ) -> Result<serde_json::Value, RuntimeError> {
        Err(RuntimeError::Unsupported(format!("browser_action: {action}")))
    }

    async fn proxy_action(
        &self,
        action: &str,
        _args: &serde_json::Value,
    ) -> Result<serde_json::Value, RuntimeError> {
        Err(RuntimeError::Unsupported(format!("proxy_action: {action}")))
    }

    /// Record one step of the structured plan. Default: not tracked.
    fn push_plan_step(&self, _step: PlanStep) {}

    /// The structured plan accumulated so far, if the runtime tracks one.
    fn plan(&self) -> Option<Plan> {
        None
    }
}
