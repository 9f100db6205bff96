use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use muster_core::events::{CrewEvent, EventSink};
use muster_core::ids::ToolCallId;
use muster_core::messages::{Message, ToolCallBlock};
use muster_core::provider::{CompletionMeta, ModelClient};
use muster_core::runtime::Runtime;
use muster_core::tokens::TokenUsage;

use muster_registry::CrewRegistry;

use crate::error::EngineError;
use crate::registry::ToolRegistry;
use crate::truncate;

/// Portion of the system prompt mixed into cache keys, so the same call
/// from differently-prompted agents is not conflated.
const CACHE_CONTEXT_PREFIX: usize = 500;

/// Result of executing one requested tool call.
#[derive(Clone, Debug)]
pub struct ToolExecution {
    pub call_id: ToolCallId,
    pub tool_name: String,
    pub output: String,
    pub success: bool,
    pub cached: bool,
}

/// Result of one request/execute/respond step.
#[derive(Clone, Debug)]
pub struct StepResult {
    pub content: Option<String>,
    pub executions: Vec<ToolExecution>,
    pub usage: Option<TokenUsage>,
    pub metadata: CompletionMeta,
    pub has_tool_calls: bool,
}

/// Runs single steps of the shared tool-call cycle for one agent: send the
/// transcript, execute any requested calls against this agent's runtime,
/// append the results. Both the orchestrator and every worker drive one of
/// these, each with its own runtime and role.
pub struct StepRunner {
    client: Arc<dyn ModelClient>,
    tools: Arc<ToolRegistry>,
    registry: CrewRegistry,
    runtime: Arc<dyn Runtime>,
    events: Arc<dyn EventSink>,
    role: String,
    system_prompt: String,
}

impl StepRunner {
    pub fn new(
        client: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        registry: CrewRegistry,
        runtime: Arc<dyn Runtime>,
        events: Arc<dyn EventSink>,
        role: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tools,
            registry,
            runtime,
            events,
            role: role.into(),
            system_prompt: system_prompt.into(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn cache_context(&self) -> &str {
        let mut cut = CACHE_CONTEXT_PREFIX.min(self.system_prompt.len());
        while cut > 0 && !self.system_prompt.is_char_boundary(cut) {
            cut -= 1;
        }
        &self.system_prompt[..cut]
    }

    /// Execute one requested call: cache lookup first, then resolution and
    /// execution. Failures are captured in the returned record, never
    /// propagated.
    async fn execute_call(&self, call: &ToolCallBlock) -> ToolExecution {
        self.events.emit(CrewEvent::ToolCall {
            tool: call.name.clone(),
            args: call.arguments.clone(),
        });

        let execution = match self.tools.get(&call.name) {
            None => ToolExecution {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                output: format!("Unknown tool: {}", call.name),
                success: false,
                cached: false,
            },
            Some(tool) => {
                let hash = tool.cacheable().then(|| {
                    CrewRegistry::tool_hash(
                        &self.role,
                        &call.name,
                        &call.arguments,
                        self.cache_context(),
                    )
                });

                let hit = hash.as_ref().and_then(|h| {
                    self.registry.get_tool_result(h).unwrap_or_else(|e| {
                        warn!(error = %e, tool = %call.name, "tool cache read failed");
                        None
                    })
                });

                match hit {
                    Some(output) => {
                        debug!(tool = %call.name, "tool cache hit");
                        ToolExecution {
                            call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            output,
                            success: true,
                            cached: true,
                        }
                    }
                    None => match tool.execute(call.arguments.clone(), self.runtime.as_ref()).await
                    {
                        Ok(output) => {
                            let output =
                                truncate::truncate_output(&output, truncate::MAX_TOOL_OUTPUT);
                            if let Some(h) = &hash {
                                if let Err(e) = self.registry.cache_tool_result(h, &output) {
                                    warn!(error = %e, tool = %call.name, "tool cache write failed");
                                }
                            }
                            ToolExecution {
                                call_id: call.id.clone(),
                                tool_name: call.name.clone(),
                                output,
                                success: true,
                                cached: false,
                            }
                        }
                        Err(e) => ToolExecution {
                            call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            output: format!("Error: {e}"),
                            success: false,
                            cached: false,
                        },
                    },
                }
            }
        };

        self.events.emit(CrewEvent::ToolResult {
            tool: execution.tool_name.clone(),
            result: execution.output.chars().take(200).collect(),
        });

        execution
    }

    /// Fan out all requested calls concurrently; the returned vec is in
    /// request order regardless of completion order.
    pub async fn execute_calls(&self, calls: &[ToolCallBlock]) -> Vec<ToolExecution> {
        futures::future::join_all(calls.iter().map(|call| self.execute_call(call))).await
    }

    /// One full step: model completion, assistant turn, concurrent tool
    /// execution, one tool-result turn per call in request order.
    pub async fn execute_step(
        &self,
        messages: &mut Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<StepResult, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Aborted);
        }

        let completion = self
            .client
            .generate(&self.system_prompt, messages, &self.tools.definitions())
            .await?;

        let has_tool_calls = completion.has_tool_calls();
        messages.push(Message::assistant_with_calls(
            completion.text(),
            completion.tool_calls.clone(),
        ));

        let executions = if has_tool_calls {
            let executions = self.execute_calls(&completion.tool_calls).await;
            for execution in &executions {
                messages.push(Message::tool_result(
                    execution.call_id.clone(),
                    execution.output.clone(),
                    !execution.success,
                ));
            }
            executions
        } else {
            Vec::new()
        };

        Ok(StepResult {
            content: completion.content,
            executions,
            usage: completion.usage,
            metadata: completion.metadata,
            has_tool_calls,
        })
    }
}

/// Outcome of a bounded agent loop.
#[derive(Clone, Debug, Default)]
pub struct LoopOutcome {
    /// The final answer, or the last partial content when the cap was hit.
    pub final_text: String,
    pub iterations: u32,
    /// The loop stopped on its bound (or the gateway reported its own cap)
    /// instead of a final answer. A soft failure, not an error.
    pub hit_iteration_cap: bool,
    /// The agent reported its own task as infeasible.
    pub infeasible: bool,
}

/// Drives an agent's step cycle until a final answer or the iteration cap.
pub struct AgentRunner {
    step: StepRunner,
    max_iterations: u32,
}

impl AgentRunner {
    pub fn new(step: StepRunner, max_iterations: u32) -> Self {
        Self {
            step,
            max_iterations,
        }
    }

    /// Run the loop for one task. `on_step` observes every settled step —
    /// callers use it for bookkeeping between tool rounds.
    pub async fn run<F>(
        &self,
        task: &str,
        cancel: &CancellationToken,
        mut on_step: F,
    ) -> Result<LoopOutcome, EngineError>
    where
        F: FnMut(&StepResult),
    {
        let mut messages = vec![Message::user_text(task)];
        let mut outcome = LoopOutcome::default();
        let mut finished = false;

        while outcome.iterations < self.max_iterations {
            outcome.iterations += 1;

            let result = self.step.execute_step(&mut messages, cancel).await?;
            on_step(&result);

            if result.metadata.max_iterations_reached {
                outcome.hit_iteration_cap = true;
            }
            if result.metadata.replan_impossible {
                outcome.infeasible = true;
            }
            if let Some(content) = &result.content {
                if !content.is_empty() {
                    outcome.final_text = content.clone();
                }
            }

            if !result.has_tool_calls {
                finished = true;
                break;
            }
        }

        if !finished {
            outcome.hit_iteration_cap = true;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use muster_core::events::NullSink;
    use muster_core::runtime::{CommandResult, RuntimeError};
    use muster_core::tools::{Tool, ToolError};
    use muster_llm::{MockClient, MockCompletion};
    use muster_registry::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct TestRuntime;

    #[async_trait]
    impl Runtime for TestRuntime {
        fn environment(&self) -> String {
            "test".into()
        }
        async fn start(&self) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn execute_command(
            &self,
            _command: &str,
            _timeout: Duration,
        ) -> Result<CommandResult, RuntimeError> {
            Err(RuntimeError::NotRunning)
        }
    }

    /// Counts executions; optionally sleeps to scramble completion order.
    struct CountingTool {
        name: String,
        executions: Arc<AtomicUsize>,
        delay: Duration,
        fail: bool,
    }

    impl CountingTool {
        fn new(name: &str, executions: Arc<AtomicUsize>) -> Self {
            Self {
                name: name.into(),
                executions,
                delay: Duration::ZERO,
                fail: false,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "counts executions"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            args: serde_json::Value,
            _runtime: &dyn Runtime,
        ) -> Result<String, ToolError> {
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            self.executions.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ToolError::ExecutionFailed("scan blew up".into()));
            }
            Ok(format!("ran with {args}"))
        }
    }

    fn runner_with(client: Arc<dyn ModelClient>, tools: ToolRegistry) -> StepRunner {
        let registry = CrewRegistry::new(Arc::new(MemoryStore::new()));
        StepRunner::new(
            client,
            Arc::new(tools),
            registry,
            Arc::new(TestRuntime),
            Arc::new(NullSink),
            "worker",
            "test system prompt",
        )
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCallBlock {
        ToolCallBlock {
            id: ToolCallId::new(),
            name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn final_answer_step_appends_assistant_turn() {
        let client = Arc::new(MockClient::new(vec![MockCompletion::text("all done")]));
        let runner = runner_with(client, ToolRegistry::new());

        let mut messages = vec![Message::user_text("go")];
        let result = runner
            .execute_step(&mut messages, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.has_tool_calls);
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[1], Message::Assistant(a) if a.content == "all done"));
    }

    #[tokio::test]
    async fn tool_call_step_appends_results_per_call() {
        let executions = Arc::new(AtomicUsize::new(0));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CountingTool::new("probe", executions.clone())));

        let client = Arc::new(MockClient::new(vec![MockCompletion::tool_calls(
            Some("probing"),
            vec![
                ("probe", serde_json::json!({"host": "a"})),
                ("probe", serde_json::json!({"host": "b"})),
            ],
        )]));
        let runner = runner_with(client, tools);

        let mut messages = vec![Message::user_text("go")];
        let result = runner
            .execute_step(&mut messages, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.has_tool_calls);
        assert_eq!(result.executions.len(), 2);
        assert_eq!(executions.load(Ordering::SeqCst), 2);
        // user, assistant(tool_calls), tool, tool
        assert_eq!(messages.len(), 4);
        assert!(matches!(&messages[2], Message::ToolResult(_)));
        assert!(matches!(&messages[3], Message::ToolResult(_)));
    }

    #[tokio::test]
    async fn identical_calls_within_ttl_execute_once() {
        let executions = Arc::new(AtomicUsize::new(0));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CountingTool::new("probe", executions.clone())));

        let args = serde_json::json!({"host": "a", "port": 80});
        let reordered = serde_json::json!({"port": 80, "host": "a"});
        let client = Arc::new(MockClient::new(vec![
            MockCompletion::tool_call("probe", args),
            MockCompletion::tool_call("probe", reordered),
        ]));
        let runner = runner_with(client, tools);

        let mut messages = vec![Message::user_text("go")];
        let first = runner
            .execute_step(&mut messages, &CancellationToken::new())
            .await
            .unwrap();
        let second = runner
            .execute_step(&mut messages, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!first.executions[0].cached);
        assert!(second.executions[0].cached);
        assert!(second.executions[0].success);
        assert_eq!(second.executions[0].output, first.executions[0].output);
        // Argument order differed, but the canonical hash matched: one run.
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_executions_are_not_cached() {
        let executions = Arc::new(AtomicUsize::new(0));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(
            CountingTool::new("probe", executions.clone()).failing(),
        ));

        let args = serde_json::json!({"host": "a"});
        let client = Arc::new(MockClient::new(vec![
            MockCompletion::tool_call("probe", args.clone()),
            MockCompletion::tool_call("probe", args),
        ]));
        let runner = runner_with(client, tools);

        let mut messages = vec![Message::user_text("go")];
        let first = runner
            .execute_step(&mut messages, &CancellationToken::new())
            .await
            .unwrap();
        let second = runner
            .execute_step(&mut messages, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!first.executions[0].success);
        assert!(first.executions[0].output.contains("scan blew up"));
        // The failure was never cached, so the tool ran again.
        assert!(!second.executions[0].cached);
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_tool_produces_error_result() {
        let client = Arc::new(MockClient::new(vec![MockCompletion::tool_call(
            "no_such_tool",
            serde_json::json!({}),
        )]));
        let runner = runner_with(client, ToolRegistry::new());

        let mut messages = vec![Message::user_text("go")];
        let result = runner
            .execute_step(&mut messages, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.executions[0].success);
        assert!(result.executions[0].output.contains("Unknown tool"));
        assert!(matches!(&messages[2], Message::ToolResult(tr) if tr.is_error));
    }

    #[tokio::test]
    async fn results_keep_request_order_despite_completion_order() {
        let executions = Arc::new(AtomicUsize::new(0));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(
            CountingTool::new("slow", executions.clone())
                .with_delay(Duration::from_millis(80)),
        ));
        tools.register(Arc::new(CountingTool::new("fast", executions.clone())));

        let runner = runner_with(Arc::new(MockClient::new(vec![])), tools);
        let calls = vec![
            call("slow", serde_json::json!({"n": 1})),
            call("fast", serde_json::json!({"n": 2})),
            call("slow", serde_json::json!({"n": 3})),
        ];

        let results = runner.execute_calls(&calls).await;

        // The middle call finishes first; order must still be T1, T2, T3.
        assert_eq!(results.len(), 3);
        for (execution, call) in results.iter().zip(&calls) {
            assert_eq!(execution.call_id, call.id);
            assert_eq!(execution.tool_name, call.name);
        }
    }

    #[tokio::test]
    async fn cancelled_step_aborts() {
        let client = Arc::new(MockClient::new(vec![MockCompletion::text("never")]));
        let runner = runner_with(client, ToolRegistry::new());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut messages = vec![Message::user_text("go")];
        let result = runner.execute_step(&mut messages, &cancel).await;
        assert!(matches!(result, Err(EngineError::Aborted)));
    }

    #[tokio::test]
    async fn loop_stops_on_final_answer() {
        let executions = Arc::new(AtomicUsize::new(0));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CountingTool::new("probe", executions.clone())));

        let client = Arc::new(MockClient::new(vec![
            MockCompletion::tool_call("probe", serde_json::json!({"host": "a"})),
            MockCompletion::text("host a is up"),
        ]));
        let runner = AgentRunner::new(runner_with(client, tools), 10);

        let outcome = runner
            .run("check host a", &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.final_text, "host a is up");
        assert_eq!(outcome.iterations, 2);
        assert!(!outcome.hit_iteration_cap);
        assert!(!outcome.infeasible);
    }

    #[tokio::test]
    async fn loop_caps_iterations_softly() {
        let executions = Arc::new(AtomicUsize::new(0));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CountingTool::new("probe", executions.clone())));

        // Always tool calls with fresh arguments — the loop never finishes
        // on its own.
        let responses: Vec<MockCompletion> = (0..5)
            .map(|i| {
                MockCompletion::tool_calls(
                    Some(&format!("round {i}")),
                    vec![("probe", serde_json::json!({"round": i}))],
                )
            })
            .collect();
        let runner = AgentRunner::new(runner_with(Arc::new(MockClient::new(responses)), tools), 3);

        let outcome = runner
            .run("keep probing", &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert!(outcome.hit_iteration_cap);
        assert_eq!(outcome.iterations, 3);
        // Partial content is preserved.
        assert_eq!(outcome.final_text, "round 2");
    }

    #[tokio::test]
    async fn loop_surfaces_metadata_flags() {
        let client = Arc::new(MockClient::new(vec![MockCompletion::infeasible(
            "target is unreachable",
        )]));
        let runner = AgentRunner::new(runner_with(client, ToolRegistry::new()), 10);

        let outcome = runner
            .run("scan it", &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert!(outcome.infeasible);
        assert_eq!(outcome.final_text, "target is unreachable");
    }

    #[tokio::test]
    async fn observer_sees_every_step() {
        let executions = Arc::new(AtomicUsize::new(0));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CountingTool::new("probe", executions)));

        let client = Arc::new(MockClient::new(vec![
            MockCompletion::tool_call("probe", serde_json::json!({})),
            MockCompletion::text("done"),
        ]));
        let runner = AgentRunner::new(runner_with(client, tools), 10);

        let mut seen = 0;
        runner
            .run("go", &CancellationToken::new(), |_| seen += 1)
            .await
            .unwrap();
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn model_error_propagates() {
        use muster_core::errors::ModelError;
        let client = Arc::new(MockClient::new(vec![MockCompletion::Error(
            ModelError::Overloaded,
        )]));
        let runner = AgentRunner::new(runner_with(client, ToolRegistry::new()), 10);

        let result = runner.run("go", &CancellationToken::new(), |_| {}).await;
        assert!(matches!(result, Err(EngineError::Model(_))));
    }
}
