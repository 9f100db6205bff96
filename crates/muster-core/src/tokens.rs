use serde::{Deserialize, Serialize};

/// Per-completion token usage as reported by the model client.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    /// Some gateways report only a total; when absent it is derived.
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.input_tokens + self.output_tokens
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_prefers_reported_value() {
        let usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 20,
        };
        assert_eq!(usage.total(), 20);
    }

    #[test]
    fn total_derived_when_missing() {
        let usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 0,
        };
        assert_eq!(usage.total(), 15);
    }

    #[test]
    fn deserializes_with_missing_fields() {
        let usage: TokenUsage = serde_json::from_str(r#"{"total_tokens": 42}"#).unwrap();
        assert_eq!(usage.total(), 42);
    }
}
