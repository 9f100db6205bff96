use std::collections::BTreeMap;

use muster_core::ids::WorkerId;
use muster_core::worker::WorkerSummary;

use crate::registry::ToolRegistry;

/// Tool descriptions in prompts are cut at 80 chars.
const TOOL_DESC_LIMIT: usize = 80;

pub const SYNTHESIS_SYSTEM: &str = "You are the lead of a security assessment crew. \
Write the final report from the worker findings you are given. Group findings by \
severity, keep evidence verbatim, and call out anything that was skipped or failed \
so coverage gaps are visible. Do not invent findings.";

fn format_tools(tools: &ToolRegistry) -> String {
    let mut lines = Vec::new();
    for def in tools.definitions() {
        let desc = if def.description.chars().count() > TOOL_DESC_LIMIT {
            let cut: String = def.description.chars().take(TOOL_DESC_LIMIT).collect();
            format!("{cut}...")
        } else {
            def.description.clone()
        };
        lines.push(format!("- **{}**: {desc}", def.name));
    }
    if lines.is_empty() {
        "No tools available".to_string()
    } else {
        lines.join("\n")
    }
}

/// System prompt for the crew orchestrator.
pub fn crew_prompt(
    target: &str,
    prior_context: &str,
    environment: &str,
    worker_tools: &ToolRegistry,
) -> String {
    format!(
        "You orchestrate a crew of autonomous security-assessment agents.\n\
         \n\
         Target: {target}\n\
         Prior context: {prior_context}\n\
         Execution environment: {environment}\n\
         \n\
         Break the task into independent sub-tasks and delegate each with \
         `spawn_agent`; pass `depends_on` when one sub-task needs another's \
         output. Check progress with `agent_status`, collect settled results \
         with `wait_for_agents`, and end the run by calling `finish` — its \
         output is the final report. Workers have these tools:\n\
         {tools}",
        target = if target.is_empty() { "Not specified" } else { target },
        prior_context = if prior_context.is_empty() {
            "None - starting fresh"
        } else {
            prior_context
        },
        tools = format_tools(worker_tools),
    )
}

/// System prompt for one worker agent.
pub fn worker_prompt(target: &str, environment: &str, tools: &ToolRegistry) -> String {
    format!(
        "You are a security-assessment agent working one delegated sub-task.\n\
         \n\
         Target: {target}\n\
         Execution environment: {environment}\n\
         \n\
         Work step by step and record every meaningful step with `report_step` \
         (status complete, skip, or fail, with what you found). Stay in scope: \
         only the stated target. When the sub-task is done, reply with a short \
         summary and no tool calls.\n\
         \n\
         Available tools:\n\
         {tools}",
        target = if target.is_empty() { "Not specified" } else { target },
        tools = format_tools(tools),
    )
}

/// User prompt for the finish synthesis call.
pub fn synthesis_prompt(context: &str, results: &BTreeMap<WorkerId, WorkerSummary>) -> String {
    let mut sections = Vec::new();
    for (id, summary) in results {
        let body = summary
            .result
            .as_deref()
            .or(summary.error.as_deref())
            .unwrap_or("No findings.");
        sections.push(format!(
            "## {id} [{status}]\nTask: {task}\n{body}",
            status = summary.status,
            task = summary.task,
        ));
    }

    let mut prompt = String::from("Worker findings:\n\n");
    if sections.is_empty() {
        prompt.push_str("(no workers ran)\n");
    } else {
        prompt.push_str(&sections.join("\n\n"));
        prompt.push('\n');
    }
    if !context.is_empty() {
        prompt.push_str("\nAdditional context from the orchestrator:\n");
        prompt.push_str(context);
        prompt.push('\n');
    }
    prompt.push_str("\nWrite the final report.");
    prompt
}
