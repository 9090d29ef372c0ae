use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Tool descriptor advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-schema object describing the arguments.
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

pub fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    pub fn as_function_tool(&self) -> FunctionTool {
        FunctionTool {
            kind: "function".to_owned(),
            function: self.clone(),
        }
    }
}

/// Chat-completions `tools[]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_tool_wraps_descriptor() {
        let descriptor = ToolDescriptor::new("lookup", "Find a city", empty_object_schema());
        let value = serde_json::to_value(descriptor.as_function_tool()).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "lookup");
        assert_eq!(value["function"]["parameters"]["type"], "object");
    }
}
