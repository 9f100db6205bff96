use std::time::Duration;

use async_trait::async_trait;

use muster_core::runtime::Runtime;
use muster_core::tools::{Tool, ToolError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_TIMEOUT_SECS: u64 = 600;

/// Executes an assessment command inside the calling agent's sandbox.
/// Cacheable: an identical command against the same target within the
/// cache TTL is served from the registry instead of re-running.
pub struct ShellTool {
    timeout: Duration,
}

impl ShellTool {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the sandbox and return its output"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (max 600)"
                }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        runtime: &dyn Runtime,
    ) -> Result<String, ToolError> {
        let command = args["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("command is required".into()))?;

        let timeout = args["timeout"]
            .as_u64()
            .map(|secs| Duration::from_secs(secs.min(MAX_TIMEOUT_SECS)))
            .unwrap_or(self.timeout);

        let result = runtime.execute_command(command, timeout).await?;

        let mut output = String::new();
        if !result.stdout.is_empty() {
            output.push_str(&result.stdout);
        }
        if !result.stderr.is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str("STDERR:\n");
            output.push_str(&result.stderr);
        }
        if output.is_empty() {
            output = "(no output)".to_string();
        }
        if !result.success() {
            output = format!("Exit code: {}\n{output}", result.exit_code);
        }

        Ok(output)
    }
}
