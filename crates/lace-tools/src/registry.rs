//! Tool registry: a name → [`Tool`] mapping, populated once at startup
//! (spec §4.4: "Registration occurs at startup; tools declare their schema
//! and annotations").

use std::collections::HashMap;
use std::sync::Arc;

use lace_types::tool::ToolDefinition;

use crate::error::{Error, Result};
use crate::tool::Tool;

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name.clone();
        tracing::info!(tool = %name, "registered tool");
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptors for every registered tool, as handed to the provider for
    /// tool-calling (spec §4.3/§4.4).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}
