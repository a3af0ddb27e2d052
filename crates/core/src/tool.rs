//! Tool contract: the shape a callable capability must satisfy.
//!
//! A tool declares a name, a description, typed parameters with a required
//! subset, and an execute entry point taking decoded JSON arguments. The loop
//! resolves tools by name out of the driver's registry when the model requests
//! them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::driver::ToolDefinition;
use crate::error::ToolError;

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProperty {
    /// Parameter name
    pub name: String,

    /// JSON-schema type ("string", "number", "boolean", ...)
    #[serde(rename = "type")]
    pub property_type: String,

    /// Human-readable description sent to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Allowed values, when the parameter is an enumeration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

/// A callable capability exposed to the model.
///
/// Declared properties keep their declaration order; `required` names must be
/// a subset of the declared property names (builders enforce this at
/// declaration time).
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (unique within a run).
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// Declared parameters, in declaration order.
    fn properties(&self) -> &[ToolProperty];

    /// Names of the parameters the model must supply.
    fn required(&self) -> &[String];

    /// Free-form metadata attached by the registrar; not sent to the model.
    fn metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::new()
    }

    /// Execute the tool with decoded JSON arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for prop in self.properties() {
            let mut spec = serde_json::Map::new();
            spec.insert("type".into(), prop.property_type.clone().into());
            if let Some(description) = &prop.description {
                spec.insert("description".into(), description.clone().into());
            }
            if let Some(values) = &prop.enum_values {
                spec.insert("enum".into(), values.clone().into());
            }
            properties.insert(prop.name.clone(), spec.into());
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.required(),
        })
    }

    /// Convert this tool into a ToolDefinition for handing to a driver.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Synchronous callback backing a [`FunctionTool`].
pub type ToolCallback =
    dyn Fn(serde_json::Value) -> std::result::Result<serde_json::Value, ToolError> + Send + Sync;

/// A tool built from a closure, for callers that do not want a dedicated type.
///
/// ```
/// use capstan_core::tool::FunctionTool;
/// use serde_json::json;
///
/// let tool = FunctionTool::new("get_weather", "Get the current weather")
///     .add_property("location", "string", "City name")
///     .set_required("location")
///     .unwrap()
///     .with_callback(|args| Ok(json!(format!("Weather in {}", args["location"]))));
/// ```
pub struct FunctionTool {
    name: String,
    description: String,
    properties: Vec<ToolProperty>,
    required: Vec<String>,
    metadata: serde_json::Map<String, serde_json::Value>,
    callback: Option<Box<ToolCallback>>,
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("properties", &self.properties)
            .field("required", &self.required)
            .field("metadata", &self.metadata)
            .field("callback", &self.callback.as_ref().map(|_| ".."))
            .finish()
    }
}

impl FunctionTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            properties: Vec::new(),
            required: Vec::new(),
            metadata: serde_json::Map::new(),
            callback: None,
        }
    }

    /// Declare a parameter. Redeclaring a name replaces the earlier spec in
    /// place, keeping its position.
    pub fn add_property(
        mut self,
        name: impl Into<String>,
        property_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.upsert(ToolProperty {
            name: name.into(),
            property_type: property_type.into(),
            description: Some(description.into()),
            enum_values: None,
        });
        self
    }

    /// Declare an enumerated parameter.
    pub fn add_enum_property(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        values: Vec<String>,
    ) -> Self {
        self.upsert(ToolProperty {
            name: name.into(),
            property_type: "string".into(),
            description: Some(description.into()),
            enum_values: Some(values),
        });
        self
    }

    /// Mark a declared parameter as required.
    ///
    /// Fails with [`ToolError::UndeclaredProperty`] when the name has not been
    /// declared with `add_property` first.
    pub fn set_required(mut self, name: impl Into<String>) -> Result<Self, ToolError> {
        let name = name.into();
        if !self.properties.iter().any(|p| p.name == name) {
            return Err(ToolError::UndeclaredProperty {
                tool_name: self.name.clone(),
                property: name,
            });
        }
        if !self.required.contains(&name) {
            self.required.push(name);
        }
        Ok(self)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_callback(
        mut self,
        callback: impl Fn(serde_json::Value) -> std::result::Result<serde_json::Value, ToolError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    fn upsert(&mut self, property: ToolProperty) {
        match self.properties.iter_mut().find(|p| p.name == property.name) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn properties(&self) -> &[ToolProperty] {
        &self.properties
    }

    fn required(&self) -> &[String] {
        &self.required
    }

    fn metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        self.metadata.clone()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        match &self.callback {
            Some(callback) => callback(arguments),
            None => Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: "no callback registered".into(),
            }),
        }
    }
}

/// An ordered registry of tools, keyed by name.
///
/// Registration order is preserved: it is the order tools are presented to
/// the model. Re-registering a name replaces the tool in place.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<std::sync::Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name,
    /// keeping its position.
    pub fn register(&mut self, tool: std::sync::Arc<dyn Tool>) {
        match self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            Some(existing) => *existing = tool,
            None => self.tools.push(tool),
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// Get all tool definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// List all registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
