//! Local capabilities the backend can invoke mid-turn.
//!
//! A turn request declares every registered tool; when the backend
//! answers with a `functionCall` instead of text, the orchestrator
//! executes the matching tool and folds its result back into the same
//! turn as a tool message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::backend::ToolDefinition;
use crate::error::ToolError;

/// A request to execute a tool, as decoded from the backend response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID the result must be correlated back to
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content, folded into the turn as a tool message
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// One local capability, such as chart generation.
///
/// Implementations are registered in the [`ToolRegistry`] and declared
/// to the backend on every turn.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "generate_chart").
    fn name(&self) -> &str;

    /// What this tool does, sent to the backend as part of the
    /// declaration.
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError>;

    /// The declaration sent on every turn request.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The set of tools available to the current session, keyed by name.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Declarations for every registered tool.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool call against the registered tool it names.
    pub async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError> {
        let tool = self.tools.get(&call.name).ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        tool.execute(call.arguments.clone()).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Summarizes a numeric data series, the kind of helper the chart
    /// tool leans on.
    struct SeriesStatsTool;

    #[async_trait]
    impl Tool for SeriesStatsTool {
        fn name(&self) -> &str {
            "series_stats"
        }
        fn description(&self) -> &str {
            "Summarize a numeric data series"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "values": { "type": "array", "items": { "type": "number" } }
                },
                "required": ["values"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError> {
            let values: Vec<f64> = arguments["values"]
                .as_array()
                .ok_or_else(|| ToolError::InvalidArguments("values must be an array".into()))?
                .iter()
                .filter_map(|v| v.as_f64())
                .collect();
            if values.is_empty() {
                return Err(ToolError::InvalidArguments("values must not be empty".into()));
            }
            let sum: f64 = values.iter().sum();
            Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: format!("mean={}", sum / values.len() as f64),
                data: None,
            })
        }
    }

    #[test]
    fn registered_tool_is_found_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SeriesStatsTool));
        assert!(registry.get("series_stats").is_some());
        assert!(registry.get("generate_chart").is_none());
    }

    #[test]
    fn definitions_carry_the_parameter_schema() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SeriesStatsTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "series_stats");
        assert_eq!(defs[0].parameters["required"][0], "values");
    }

    #[tokio::test]
    async fn execute_routes_the_call_to_its_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SeriesStatsTool));

        let call = ToolCall {
            id: "call_1".into(),
            name: "series_stats".into(),
            arguments: serde_json::json!({ "values": [1.0, 2.0, 3.0] }),
        };
        let result = registry.execute(&call).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "mean=2");
    }

    #[tokio::test]
    async fn bad_arguments_surface_as_tool_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SeriesStatsTool));

        let call = ToolCall {
            id: "call_1".into(),
            name: "series_stats".into(),
            arguments: serde_json::json!({ "values": [] }),
        };
        let err = registry.execute(&call).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            id: "call_1".into(),
            name: "render_table".into(),
            arguments: serde_json::json!({}),
        };
        let err = registry.execute(&call).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
