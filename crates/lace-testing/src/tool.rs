//! A configurable stub [`Tool`] for exercising the executor and turn
//! engine without a real subprocess or filesystem.

use serde_json::{json, Map, Value};

use lace_tools::Tool;
use lace_types::tool::{ToolAnnotations, ToolDefinition};

pub struct StubTool {
    name: String,
    schema: Value,
    annotations: ToolAnnotations,
    outcome: StubOutcome,
}

#[derive(Clone)]
enum StubOutcome {
    Text(String),
    Fail(String),
}

impl StubTool {
    /// A stub that always succeeds with `text`, accepting any object
    /// argument (an empty-properties schema).
    pub fn succeeding(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: json!({ "type": "object" }),
            annotations: ToolAnnotations::default(),
            outcome: StubOutcome::Text(text.into()),
        }
    }

    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: json!({ "type": "object" }),
            annotations: ToolAnnotations::default(),
            outcome: StubOutcome::Fail(message.into()),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn destructive(mut self) -> Self {
        self.annotations.destructive_hint = Some(true);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.annotations.read_only_hint = Some(true);
        self
    }
}

#[async_trait::async_trait]
impl Tool for StubTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: format!("stub tool {}", self.name),
            input_schema: self.schema.clone(),
            annotations: self.annotations.clone(),
        }
    }

    async fn call(&self, _arguments: Map<String, Value>) -> std::result::Result<String, String> {
        match &self.outcome {
            StubOutcome::Text(text) => Ok(text.clone()),
            StubOutcome::Fail(message) => Err(message.clone()),
        }
    }
}
