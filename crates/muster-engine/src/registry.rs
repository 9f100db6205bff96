use std::collections::HashMap;
use std::sync::Arc;

use muster_core::tools::{Tool, ToolDefinition};

/// Registry of callable tools for one agent.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. A later registration under the same name wins.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    /// Check if a tool is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all tool names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get tool definitions for the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Total tool count.
    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Iterate the registered tools.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ToolRegistry {
    fn clone(&self) -> Self {
        Self {
            tools: self
                .tools
                .iter()
                .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use muster_core::runtime::Runtime;
    use muster_core::tools::ToolError;

    struct DummyTool {
        name: String,
    }

    impl DummyTool {
        fn new(name: &str) -> Arc<dyn Tool> {
            Arc::new(Self {
                name: name.to_string(),
            })
        }
    }

    #[async_trait]
    impl Tool for DummyTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "A dummy tool for testing"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _args: serde_json::Value,
            _runtime: &dyn Runtime,
        ) -> Result<String, ToolError> {
            Ok("ok".into())
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("shell"));

        assert!(registry.contains("shell"));
        assert!(!registry.contains("finish"));
        assert_eq!(registry.count(), 1);
        assert!(registry.get("shell").is_some());
    }

    #[test]
    fn unregister() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("shell"));
        assert!(registry.unregister("shell"));
        assert!(!registry.contains("shell"));
        assert!(!registry.unregister("shell"));
    }

    #[test]
    fn names_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("shell"));
        registry.register(DummyTool::new("finish"));
        registry.register(DummyTool::new("report_step"));

        assert_eq!(registry.names(), vec!["finish", "report_step", "shell"]);
    }

    #[test]
    fn definitions_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("shell"));
        registry.register(DummyTool::new("finish"));

        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "finish");
        assert_eq!(defs[1].name, "shell");
    }

    #[test]
    fn clone_shares_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("shell"));

        let mut cloned = registry.clone();
        cloned.register(DummyTool::new("finish"));

        assert_eq!(registry.count(), 1);
        assert_eq!(cloned.count(), 2);
    }

    #[test]
    fn later_registration_wins() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("shell"));
        registry.register(DummyTool::new("shell"));
        assert_eq!(registry.count(), 1);
    }
}
