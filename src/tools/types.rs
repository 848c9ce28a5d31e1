//! Tool declarations and the uniform result envelope.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::errors::ToolError;

// ─── Declarations ────────────────────────────────────────────────────────────

/// JSON-schema primitive type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    /// Element type for `array` parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<ParamType>,
}

impl ToolParameter {
    pub fn new(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: false,
            enum_values: None,
            items: None,
        }
    }

    pub fn string(name: &str, description: &str) -> Self {
        Self::new(name, ParamType::String, description)
    }

    pub fn integer(name: &str, description: &str) -> Self {
        Self::new(name, ParamType::Integer, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn with_items(mut self, items: ParamType) -> Self {
        self.items = Some(items);
        self
    }

    /// JSON-schema fragment for this parameter.
    pub fn schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.param_type.as_str()));
        schema.insert("description".into(), json!(self.description));
        if let Some(values) = &self.enum_values {
            schema.insert("enum".into(), json!(values));
        }
        if let Some(items) = self.items {
            schema.insert("items".into(), json!({ "type": items.as_str() }));
        }
        Value::Object(schema)
    }
}

/// Static declaration of a callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl Tool {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Object schema: `properties` keyed by parameter name plus `required`.
    pub fn parameters_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.schema()))
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check `arguments` against the declaration.
    ///
    /// Required parameters must be present and non-null; present parameters
    /// must match their type and enum. Undeclared keys are ignored.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<(), ToolError> {
        let invalid = |reason: String| ToolError::InvalidArguments {
            tool: self.name.clone(),
            reason,
        };

        let args = arguments
            .as_object()
            .ok_or_else(|| invalid("arguments must be a JSON object".into()))?;

        for param in &self.parameters {
            match args.get(&param.name) {
                None | Some(Value::Null) => {
                    if param.required {
                        return Err(invalid(format!(
                            "missing required field: '{}'",
                            param.name
                        )));
                    }
                }
                Some(value) => {
                    if !param.param_type.accepts(value) {
                        return Err(invalid(format!(
                            "field '{}' must be of type {}",
                            param.name,
                            param.param_type.as_str()
                        )));
                    }
                    if let (Some(allowed), Some(s)) = (&param.enum_values, value.as_str()) {
                        if !allowed.iter().any(|a| a == s) {
                            return Err(invalid(format!(
                                "field '{}' must be one of: {}",
                                param.name,
                                allowed.join(", ")
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

// ─── Result envelope ─────────────────────────────────────────────────────────

/// Uniform result of one tool execution.
///
/// Exactly one of `data` (on success) and `error` (on failure) is set; build
/// it through [`ok`](Self::ok) / [`failure`](Self::failure) to keep that true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}

impl ToolExecutionResult {
    pub fn ok(data: Value, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: message.into(),
        }
    }

    pub fn failure(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: message.into(),
        }
    }

    pub fn from_error(err: &ToolError) -> Self {
        Self::failure(err.to_string(), err.summary())
    }

    /// Serialized form sent back to the model as the tool message body.
    pub fn to_model_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!("{{\"success\":false,\"error\":\"unserializable tool result: {e}\",\"message\":\"Tool failed\"}}")
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
