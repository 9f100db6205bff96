use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use muster_core::errors::ModelError;
use muster_core::ids::ToolCallId;
use muster_core::messages::{Message, ToolCallBlock};
use muster_core::provider::{Completion, CompletionMeta, ModelClient};
use muster_core::tokens::TokenUsage;
use muster_core::tools::ToolDefinition;

/// Pre-programmed completions for deterministic testing without API calls.
pub enum MockCompletion {
    /// Return this completion as-is.
    Reply(Completion),
    /// Return an error from the generate() call itself.
    Error(ModelError),
    /// Wait a duration, then yield the inner completion.
    Delay(Duration, Box<MockCompletion>),
}

impl MockCompletion {
    /// Convenience: a plain final-answer completion.
    pub fn text(text: &str) -> Self {
        Self::Reply(Completion {
            content: Some(text.to_string()),
            ..Default::default()
        })
    }

    /// Convenience: a completion requesting one tool call.
    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Self::tool_calls(None, vec![(name, arguments)])
    }

    /// Convenience: a completion with optional reasoning text and several
    /// tool calls.
    pub fn tool_calls(content: Option<&str>, calls: Vec<(&str, serde_json::Value)>) -> Self {
        Self::Reply(Completion {
            content: content.map(str::to_string),
            tool_calls: calls
                .into_iter()
                .map(|(name, arguments)| ToolCallBlock {
                    id: ToolCallId::new(),
                    name: name.to_string(),
                    arguments,
                })
                .collect(),
            ..Default::default()
        })
    }

    /// Convenience: a text completion carrying token usage.
    pub fn text_with_usage(text: &str, total_tokens: u64) -> Self {
        Self::Reply(Completion {
            content: Some(text.to_string()),
            usage: Some(TokenUsage {
                total_tokens,
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Convenience: a final answer flagged as infeasible by the agent.
    pub fn infeasible(text: &str) -> Self {
        Self::Reply(Completion {
            content: Some(text.to_string()),
            metadata: CompletionMeta {
                replan_impossible: true,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    /// Convenience: wrap any completion with a delay.
    pub fn delayed(delay: Duration, inner: MockCompletion) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock client that returns pre-programmed completions in sequence.
pub struct MockClient {
    responses: parking_lot::Mutex<Vec<MockCompletion>>,
    call_count: AtomicUsize,
}

impl MockClient {
    pub fn new(responses: Vec<MockCompletion>) -> Self {
        Self {
            responses: parking_lot::Mutex::new(responses),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ModelClient for MockClient {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn generate(
        &self,
        _system_prompt: &str,
        _messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<Completion, ModelError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);

        let mut current = {
            let mut responses = self.responses.lock();
            if idx >= responses.len() {
                return Err(ModelError::InvalidRequest(format!(
                    "MockClient: no response configured for call {idx}"
                )));
            }
            // Replace with a placeholder so each scripted entry is taken once.
            std::mem::replace(&mut responses[idx], MockCompletion::text(""))
        };

        loop {
            match current {
                MockCompletion::Reply(completion) => return Ok(completion),
                MockCompletion::Error(e) => return Err(e),
                MockCompletion::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}
