//! The `Tool` trait: what every registered tool implements (spec §4.4).

use serde_json::{Map, Value};

use lace_types::tool::ToolDefinition;

/// A registered, invocable tool.
///
/// `call` receives already schema-validated arguments (the executor runs
/// validation before dispatch) and returns plain text or an error string;
/// the executor wraps either into a [`lace_types::tool::ToolResult`].
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, arguments: Map<String, Value>) -> std::result::Result<String, String>;
}
