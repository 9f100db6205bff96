use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{error, info, warn};

/// A named group of interchangeable models, strongest-preference first.
#[derive(Clone, Debug)]
pub struct ModelTier {
    pub name: &'static str,
    pub models: &'static [&'static str],
    pub description: &'static str,
}

const TIERS: &[ModelTier] = &[
    ModelTier {
        name: "reasoning",
        models: &["gpt-4o", "claude-sonnet-4-5", "gemini-2.5-pro"],
        description: "High-reasoning models for planning and complex analysis.",
    },
    ModelTier {
        name: "extraction",
        models: &["gpt-4o-mini", "claude-haiku-4-5", "gemini-2.5-flash"],
        description: "Fast, low-cost models for tool-output processing.",
    },
    ModelTier {
        name: "summary",
        models: &["gpt-4o-mini", "gemini-2.5-flash"],
        description: "Terse models for report synthesis.",
    },
];

/// Routes requests to an appropriate model by tier, with a per-model
/// circuit breaker. When every model in a tier has tripped, the breakers
/// for that tier are reset rather than failing the request.
pub struct ModelRouter {
    default_tier: String,
    breakers: Mutex<HashMap<String, bool>>,
}

impl ModelRouter {
    pub fn new(default_tier: &str) -> Self {
        Self {
            default_tier: default_tier.to_string(),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn tiers() -> &'static [ModelTier] {
        TIERS
    }

    fn tier(&self, name: &str) -> &'static ModelTier {
        TIERS
            .iter()
            .find(|t| t.name == name)
            .or_else(|| TIERS.iter().find(|t| t.name == self.default_tier))
            .unwrap_or(&TIERS[0])
    }

    /// Pick the best available model for a tier (default tier when `None`
    /// or unknown).
    pub fn get_model(&self, tier: Option<&str>) -> &'static str {
        let tier = self.tier(tier.unwrap_or(&self.default_tier));
        let mut breakers = self.breakers.lock();

        if let Some(model) = tier
            .models
            .iter()
            .copied()
            .find(|m| !breakers.get(*m).copied().unwrap_or(false))
        {
            return model;
        }

        warn!(tier = tier.name, "no available models in tier — resetting circuit breakers");
        for model in tier.models {
            breakers.insert((*model).to_string(), false);
        }
        tier.models[0]
    }

    /// Open the circuit breaker for a failing model.
    pub fn report_failure(&self, model: &str) {
        error!(model, "model failure reported — opening circuit breaker");
        self.breakers.lock().insert(model.to_string(), true);
    }

    /// Close the circuit breaker for a model that answered.
    pub fn report_success(&self, model: &str) {
        let mut breakers = self.breakers.lock();
        if breakers.get(model).copied().unwrap_or(false) {
            info!(model, "model success reported — closing circuit breaker");
            breakers.insert(model.to_string(), false);
        }
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new("reasoning")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tier_first_model() {
        let router = ModelRouter::default();
        assert_eq!(router.get_model(None), "gpt-4o");
    }

    #[test]
    fn unknown_tier_falls_back_to_default() {
        let router = ModelRouter::default();
        assert_eq!(router.get_model(Some("no-such-tier")), "gpt-4o");
    }

    #[test]
    fn named_tier_selected() {
        let router = ModelRouter::default();
        assert_eq!(router.get_model(Some("extraction")), "gpt-4o-mini");
    }

    #[test]
    fn failure_skips_to_next_model() {
        let router = ModelRouter::default();
        router.report_failure("gpt-4o");
        assert_eq!(router.get_model(None), "claude-sonnet-4-5");
    }

    #[test]
    fn exhausted_tier_resets_breakers() {
        let router = ModelRouter::default();
        for model in ModelRouter::tiers()[0].models {
            router.report_failure(model);
        }
        // All tripped: the tier resets and the first model is offered again.
        assert_eq!(router.get_model(None), "gpt-4o");
        // And it stays available afterwards.
        assert_eq!(router.get_model(None), "gpt-4o");
    }

    #[test]
    fn success_closes_breaker() {
        let router = ModelRouter::default();
        router.report_failure("gpt-4o");
        router.report_success("gpt-4o");
        assert_eq!(router.get_model(None), "gpt-4o");
    }
}
