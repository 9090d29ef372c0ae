use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use skein_protocol::ToolDescriptor;

use crate::Tool;

pub const HANDOFF_TOOL_NAME: &str = "handoff";
pub const HANDOFF_AGENT_ARG: &str = "agent_name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffTarget {
    pub name: String,
    pub description: String,
}

/// Tool the model calls to transfer the conversation to a sub-agent.
///
/// The runtime intercepts calls to it before execution; calling it directly
/// only echoes the chosen agent name.
#[derive(Debug, Clone)]
pub struct HandoffTool {
    targets: Vec<HandoffTarget>,
}

impl HandoffTool {
    pub fn new(targets: Vec<HandoffTarget>) -> Self {
        Self { targets }
    }

    pub fn targets(&self) -> &[HandoffTarget] {
        &self.targets
    }
}

#[async_trait]
impl Tool for HandoffTool {
    fn descriptor(&self) -> ToolDescriptor {
        let listing = self
            .targets
            .iter()
            .map(|target| format!("- {}: {}", target.name, target.description))
            .collect::<Vec<_>>()
            .join("\n");
        let names: Vec<&str> = self.targets.iter().map(|t| t.name.as_str()).collect();

        ToolDescriptor::new(
            HANDOFF_TOOL_NAME,
            format!(
                "Hand the task over to another agent. Pick the agent whose description \
                 matches the current task and call this tool without producing other output.\n\
                 Available agents:\n{listing}"
            ),
            json!({
                "type": "object",
                "properties": {
                    HANDOFF_AGENT_ARG: {
                        "type": "string",
                        "enum": names,
                        "description": "Name of the agent to switch to"
                    }
                },
                "required": [HANDOFF_AGENT_ARG]
            }),
        )
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let agent_name = arguments
            .get(HANDOFF_AGENT_ARG)
            .and_then(Value::as_str)
            .context("handoff requires agent_name")?;
        Ok(Value::String(agent_name.to_owned()))
    }
}
