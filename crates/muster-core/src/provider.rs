use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ModelError;
use crate::messages::{Message, ToolCallBlock};
use crate::tokens::TokenUsage;
use crate::tools::ToolDefinition;

/// One model completion, already normalized: every reported tool call is a
/// `ToolCallBlock` regardless of the wire shape the gateway used.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallBlock>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub metadata: CompletionMeta,
}

/// Pass-through flags some gateways attach to a completion.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompletionMeta {
    /// This message is an intermediate continuation of one thinking step,
    /// not a new step — its usage has already been accounted for.
    #[serde(default)]
    pub intermediate: bool,
    #[serde(default)]
    pub max_iterations_reached: bool,
    /// The agent concluded its own task cannot be done.
    #[serde(default)]
    pub replan_impossible: bool,
}

impl Completion {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Trait implemented by each model client (HTTP gateway, mock, ...).
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn generate(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Completion, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ToolCallId;

    #[test]
    fn completion_defaults() {
        let c = Completion::default();
        assert!(!c.has_tool_calls());
        assert_eq!(c.text(), "");
        assert!(!c.metadata.intermediate);
        assert!(!c.metadata.replan_impossible);
    }

    #[test]
    fn completion_with_calls() {
        let c = Completion {
            content: Some("running a scan".into()),
            tool_calls: vec![ToolCallBlock {
                id: ToolCallId::new(),
                name: "shell".into(),
                arguments: serde_json::json!({"command": "whois example.com"}),
            }],
            usage: None,
            metadata: CompletionMeta::default(),
        };
        assert!(c.has_tool_calls());
        assert_eq!(c.text(), "running a scan");
    }

    #[test]
    fn metadata_deserializes_from_partial_json() {
        let meta: CompletionMeta =
            serde_json::from_str(r#"{"max_iterations_reached": true}"#).unwrap();
        assert!(meta.max_iterations_reached);
        assert!(!meta.intermediate);
    }
}
