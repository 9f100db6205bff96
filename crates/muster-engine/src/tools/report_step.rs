use async_trait::async_trait;

use muster_core::runtime::{PlanStep, Runtime, StepStatus};
use muster_core::tools::{Tool, ToolError};

/// Records one labeled step of the worker's plan on its sandbox. The
/// accumulated steps become the worker's preferred result summary.
pub struct ReportStepTool;

#[async_trait]
impl Tool for ReportStepTool {
    fn name(&self) -> &str {
        "report_step"
    }

    fn description(&self) -> &str {
        "Record one step of your plan: what you did and how it went"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["description", "status"],
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Short name of the step"
                },
                "status": {
                    "type": "string",
                    "enum": ["complete", "skip", "fail"],
                    "description": "How the step ended"
                },
                "result": {
                    "type": "string",
                    "description": "What was found, or why the step was skipped/failed"
                }
            }
        })
    }

    // Recording is a side effect that must happen every time.
    fn cacheable(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        runtime: &dyn Runtime,
    ) -> Result<String, ToolError> {
        let description = args["description"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("description is required".into()))?
            .to_string();

        let status = match args["status"].as_str() {
            Some("complete") => StepStatus::Complete,
            Some("skip") => StepStatus::Skip,
            Some("fail") => StepStatus::Fail,
            Some(other) => {
                return Err(ToolError::InvalidArguments(format!(
                    "unknown status: {other}"
                )))
            }
            None => return Err(ToolError::InvalidArguments("status is required".into())),
        };

        let result = args["result"].as_str().map(str::to_string);

        runtime.push_plan_step(PlanStep {
            description: description.clone(),
            status,
            result,
        });

        Ok(format!("Recorded step: {description}"))
    }
}
