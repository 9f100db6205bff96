use std::sync::Arc;

use tracing::{instrument, warn};

use muster_core::events::{CrewEvent, EventSink};
use muster_core::ids::ProjectId;
use muster_core::messages::Message;
use muster_core::provider::ModelClient;
use muster_core::runtime::Runtime;
use muster_core::worker::CrewState;

use muster_registry::CrewRegistry;

use crate::error::EngineError;
use crate::pool::{WorkerConfig, WorkerPool};
use crate::prompts;
use crate::registry::ToolRegistry;
use crate::runner::StepRunner;
use crate::sandbox::RuntimeFactory;
use crate::tools::{self, FinishTool, FINISH_TOOL};

/// Configuration for a crew run.
#[derive(Clone, Debug)]
pub struct CrewConfig {
    /// Iteration cap for the orchestrator's own loop. Exhausting it ends
    /// the run with whatever report is available.
    pub max_iterations: u32,
    pub worker: WorkerConfig,
}

impl Default for CrewConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            worker: WorkerConfig::default(),
        }
    }
}

/// Top-level orchestrator: converses with the model, delegates sub-tasks
/// to a worker pool, and synthesizes one final report.
pub struct CrewOrchestrator {
    client: Arc<dyn ModelClient>,
    worker_tools: Arc<ToolRegistry>,
    runtime: Arc<dyn Runtime>,
    runtime_factory: Arc<dyn RuntimeFactory>,
    registry: CrewRegistry,
    project: ProjectId,
    target: String,
    prior_context: String,
    events: Arc<dyn EventSink>,
    config: CrewConfig,
    state: CrewState,
    pool: Option<WorkerPool>,
    messages: Vec<Message>,
}

impl CrewOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ModelClient>,
        worker_tools: Arc<ToolRegistry>,
        runtime: Arc<dyn Runtime>,
        runtime_factory: Arc<dyn RuntimeFactory>,
        registry: CrewRegistry,
        project: ProjectId,
        events: Arc<dyn EventSink>,
        config: CrewConfig,
    ) -> Self {
        Self {
            client,
            worker_tools,
            runtime,
            runtime_factory,
            registry,
            project,
            target: String::new(),
            prior_context: String::new(),
            events,
            config,
            state: CrewState::Idle,
            pool: None,
            messages: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_prior_context(mut self, prior_context: impl Into<String>) -> Self {
        self.prior_context = prior_context.into();
        self
    }

    pub fn state(&self) -> CrewState {
        self.state
    }

    pub fn transcript(&self) -> &[Message] {
        &self.messages
    }

    /// Run the crew on a task. Returns the final report.
    #[instrument(skip(self, task), fields(project = %self.project))]
    pub async fn run(&mut self, task: &str) -> Result<String, EngineError> {
        self.state = CrewState::Running;
        self.events.emit(CrewEvent::Starting {
            project: self.project.clone(),
        });

        let pool = WorkerPool::new(
            Arc::clone(&self.client),
            Arc::clone(&self.worker_tools),
            Arc::clone(&self.runtime_factory),
            self.registry.clone(),
            self.project.clone(),
            self.target.clone(),
            Arc::clone(&self.events),
            self.config.worker.clone(),
        );
        self.pool = Some(pool.clone());

        let (crew_tools, finish) =
            tools::crew_toolset(&self.worker_tools, pool.clone(), Arc::clone(&self.client));
        let crew_tools = Arc::new(crew_tools);

        let system_prompt = prompts::crew_prompt(
            &self.target,
            &self.prior_context,
            &self.runtime.environment(),
            &self.worker_tools,
        );
        let step = StepRunner::new(
            Arc::clone(&self.client),
            Arc::clone(&crew_tools),
            self.registry.clone(),
            Arc::clone(&self.runtime),
            Arc::clone(&self.events),
            "orchestrator",
            system_prompt.clone(),
        );

        self.messages = vec![Message::user_text(format!(
            "Target: {}\n\nTask: {task}",
            self.target
        ))];

        let result = self
            .run_loop(&pool, &crew_tools, &finish, &step, &system_prompt)
            .await;

        // Cleanup runs on success and failure alike: no worker outlives
        // its crew.
        pool.cancel_all().await;

        match result {
            Ok(report) => {
                self.state = CrewState::Complete;
                self.events.emit(CrewEvent::Complete {
                    report: report.clone(),
                });
                Ok(report)
            }
            Err(e) => {
                self.state = CrewState::Error;
                self.events.emit(CrewEvent::Error {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_loop(
        &mut self,
        pool: &WorkerPool,
        crew_tools: &Arc<ToolRegistry>,
        finish: &Arc<FinishTool>,
        step: &StepRunner,
        system_prompt: &str,
    ) -> Result<String, EngineError> {
        let definitions = crew_tools.definitions();

        for _ in 0..self.config.max_iterations {
            let completion = self
                .client
                .generate(system_prompt, &self.messages, &definitions)
                .await?;

            if let Some(usage) = &completion.usage {
                let total = usage.total();
                if total > 0 {
                    self.events.emit(CrewEvent::Tokens { tokens: total });
                }
            }

            if completion.has_tool_calls() {
                // Free text alongside tool calls is reasoning, not a
                // deliverable.
                let content = completion.text().to_string();
                if !content.is_empty() {
                    self.events.emit(CrewEvent::Thinking {
                        content: content.clone(),
                    });
                }
                self.messages.push(Message::assistant_with_calls(
                    &content,
                    completion.tool_calls.clone(),
                ));

                let executions = step.execute_calls(&completion.tool_calls).await;
                for execution in &executions {
                    self.messages.push(Message::tool_result(
                        execution.call_id.clone(),
                        execution.output.clone(),
                        !execution.success,
                    ));
                }

                if let Some(done) = executions
                    .iter()
                    .find(|e| e.tool_name == FINISH_TOOL && e.success)
                {
                    self.emit_synthesis_tokens(finish);
                    return Ok(done.output.clone());
                }
            } else {
                let content = completion.text().to_string();
                if !content.is_empty() {
                    self.messages.push(Message::assistant_text(&content));
                }

                let have_workers = !pool.get_all_status()?.is_empty();
                if !have_workers {
                    // Nothing was delegated: the text is the final answer.
                    return Ok(content);
                }

                // Sub-agents are active, so free text is commentary —
                // force a finish with it as context.
                self.events.emit(CrewEvent::Thinking {
                    content: content.clone(),
                });
                match crew_tools.get(FINISH_TOOL) {
                    Some(tool) => {
                        match tool
                            .execute(
                                serde_json::json!({"context": content}),
                                self.runtime.as_ref(),
                            )
                            .await
                        {
                            Ok(report) => {
                                self.emit_synthesis_tokens(finish);
                                return Ok(report);
                            }
                            Err(e) => {
                                warn!(error = %e, "auto-finish failed");
                                self.events.emit(CrewEvent::Error {
                                    error: format!("Auto-finish failed: {e}"),
                                });
                                return Ok(String::new());
                            }
                        }
                    }
                    None => return Ok(content),
                }
            }
        }

        // Iteration budget exhausted without a finish.
        Ok(String::new())
    }

    fn emit_synthesis_tokens(&self, finish: &Arc<FinishTool>) {
        let tokens = finish.take_tokens();
        if tokens > 0 {
            self.events.emit(CrewEvent::Tokens { tokens });
        }
    }

    /// Cancel the crew: stop every worker, then repair the transcript so a
    /// later run starts from a structurally valid history.
    pub async fn cancel(&mut self) {
        if let Some(pool) = &self.pool {
            pool.cancel_all().await;
        }
        self.cleanup_pending_calls();
        self.state = CrewState::Idle;
    }

    /// Discard trailing incomplete turns: a user turn cancelled before any
    /// reply, dangling tool results, and the assistant turn still awaiting
    /// them. A user turn whose reply was repaired away is kept, so the
    /// next run resumes from it.
    fn cleanup_pending_calls(&mut self) {
        if matches!(self.messages.last(), Some(Message::User(_))) {
            self.messages.pop();
            return;
        }
        while matches!(self.messages.last(), Some(Message::ToolResult(_))) {
            self.messages.pop();
        }
        if matches!(self.messages.last(), Some(Message::Assistant(a)) if a.has_tool_calls()) {
            self.messages.pop();
        }
    }
}
