//! Tool registry: the set of declarations offered to the model.
//!
//! Keyed by name in a `BTreeMap`, so listing and schema export are sorted by
//! tool name and identical across calls.

use std::collections::BTreeMap;

use super::errors::ToolError;
use super::types::Tool;
use crate::inference::types::{FunctionDefinition, ToolDefinition};

// ─── ToolRegistry ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declaration. Names are unique.
    pub fn register(&mut self, tool: Tool) -> Result<(), ToolError> {
        if self.tools.contains_key(&tool.name) {
            return Err(ToolError::DuplicateTool { name: tool.name });
        }
        tracing::debug!(tool = %tool.name, params = tool.parameters.len(), "registered tool");
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All declarations, sorted by name.
    pub fn list(&self) -> Vec<&Tool> {
        self.tools.values().collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Function-calling schema for the Chat Completions API.
    pub fn to_calling_convention(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition {
                r#type: "function".to_string(),
                function: FunctionDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters_schema(),
                },
            })
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::ToolParameter;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(
            Tool::new("list_content", "List content items")
                .with_param(ToolParameter::string("kind", "Filter by kind"))
                .with_param(ToolParameter::string("client_id", "Filter by client")),
        )
        .unwrap();
        reg.register(
            Tool::new("get_clients", "Search clients")
                .with_param(ToolParameter::string("search", "Name fragment")),
        )
        .unwrap();
        reg
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut reg = registry();
        let err = reg.register(Tool::new("get_clients", "again")).unwrap_err();
        assert!(matches!(err, ToolError::DuplicateTool { .. }));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_list_sorted_by_name() {
        let reg = registry();
        assert_eq!(reg.names(), vec!["get_clients", "list_content"]);
        assert_eq!(reg.list()[0].name, "get_clients");
    }

    #[test]
    fn test_calling_convention_shape() {
        let defs = registry().to_calling_convention();
        assert_eq!(defs.len(), 2);
        let json = serde_json::to_value(&defs[0]).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "get_clients");
        assert_eq!(
            json["function"]["parameters"]["properties"]["search"]["type"],
            "string"
        );
        assert_eq!(json["function"]["parameters"]["required"], json!([]));
    }

    #[test]
    fn test_calling_convention_stable_across_calls() {
        let reg = registry();
        let first = serde_json::to_string(&reg.to_calling_convention()).unwrap();
        for _ in 0..10 {
            assert_eq!(serde_json::to_string(&reg.to_calling_convention()).unwrap(), first);
        }
        // Registration order does not leak into the output.
        let mut reversed = ToolRegistry::new();
        for tool in reg.list().into_iter().rev() {
            reversed.register(tool.clone()).unwrap();
        }
        assert_eq!(
            serde_json::to_string(&reversed.to_calling_convention()).unwrap(),
            first
        );
    }
}
