//! Tool trait and utilities for defining agent tools.
//!
//! Tools are the primary way agents act on the world. [`Tool`] is the
//! typed trait implementors write; [`DynTool`] is the object-safe view
//! the dispatcher works with; [`ToolRegistry`] holds the lookup table.
//!
//! `ToolDefinition` serializes to the OpenAI function-calling format
//! (`{"type": "function", "function": {...}}`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;

/// Definition of a tool for LLM function calling.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct ToolDefinition {
    /// Name of the tool, snake_case.
    pub name: String,

    /// Description of what the tool does; guides the model's choice.
    pub description: String,

    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Create a definition with the schema derived from `Args`.
    #[must_use]
    pub fn from_schema<Args: schemars::JsonSchema>(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let root = schemars::schema_for!(Args);
        let mut schema = serde_json::to_value(&root).unwrap_or_default();
        if let Value::Object(ref mut map) = schema {
            map.remove("$schema");
        }
        Self::new(name, description, schema)
    }

    /// Returns the tool name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Custom serialization to OpenAI function calling format.
impl Serialize for ToolDefinition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut function = serde_json::Map::new();
        function.insert("name".to_owned(), Value::String(self.name.clone()));
        function.insert(
            "description".to_owned(),
            Value::String(self.description.clone()),
        );
        function.insert("parameters".to_owned(), self.parameters.clone());

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", "function")?;
        map.serialize_entry("function", &function)?;
        map.end()
    }
}

/// The core trait for tools with typed arguments and output.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static name of the tool.
    const NAME: &'static str;

    /// Arguments type, deserialized from the model's JSON.
    type Args: for<'de> Deserialize<'de> + schemars::JsonSchema + Send;

    /// Output type, serialized back to the model.
    type Output: Serialize + Send;

    /// Error type for tool execution.
    type Error: std::fmt::Display + Send;

    /// Description of the tool for the model.
    fn description(&self) -> String;

    /// Execute the tool.
    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error>;

    /// Whether this tool may run concurrently with other parallel-safe
    /// tools from the same assistant turn. Default is sequential.
    fn parallel_safe(&self) -> bool {
        false
    }

    /// Per-call deadline override; `None` uses the dispatcher default.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Object-safe view of a [`Tool`], used by the dispatcher.
#[async_trait]
pub trait DynTool: Send + Sync {
    /// Name of the tool.
    fn name(&self) -> &str;

    /// Definition for LLM function calling.
    fn definition(&self) -> ToolDefinition;

    /// See [`Tool::parallel_safe`].
    fn parallel_safe(&self) -> bool;

    /// See [`Tool::timeout`].
    fn timeout(&self) -> Option<Duration>;

    /// Call the tool with raw JSON arguments, returning JSON output.
    async fn call_json(&self, arguments: &str) -> Result<Value, ToolError>;
}

#[async_trait]
impl<T: Tool> DynTool for T {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::from_schema::<T::Args>(Self::NAME, self.description())
    }

    fn parallel_safe(&self) -> bool {
        Tool::parallel_safe(self)
    }

    fn timeout(&self) -> Option<Duration> {
        Tool::timeout(self)
    }

    async fn call_json(&self, arguments: &str) -> Result<Value, ToolError> {
        let trimmed = arguments.trim();
        let args: T::Args = if trimmed.is_empty() {
            serde_json::from_str("{}")
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?
        } else {
            serde_json::from_str(trimmed)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?
        };
        let output = self
            .call(args)
            .await
            .map_err(|e| ToolError::execution(Self::NAME, e.to_string()))?;
        serde_json::to_value(output)
            .map_err(|e| ToolError::execution(Self::NAME, e.to_string()))
    }
}

/// A shared, type-erased tool handle.
pub type BoxedTool = Arc<dyn DynTool>;

/// Lookup table of registered tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, BoxedTool>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any previous tool with the same name.
    pub fn register(&mut self, tool: BoxedTool) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    /// Looks up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.get(name)
    }

    /// Returns `true` if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Definitions of all registered tools, sorted by name for a stable
    /// request shape.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}
