use crate::error::BotError;
use crate::types::{ToolOutput, ToolSchema};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Trait that all tools must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// Alternative names accepted in directives.
    fn aliases(&self) -> &[&str] {
        &[]
    }

    /// Lowercase message prefixes that route a chat message to this tool.
    fn triggers(&self) -> &[&str] {
        &[]
    }

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> Result<String, BotError>;
}

/// Central registry for all available tools.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        tracing::debug!("Registered tool: {}", name);
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Look a tool up by name first, then by alias.
    pub fn resolve(&self, identifier: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(identifier).or_else(|| {
            self.tools
                .values()
                .find(|t| t.aliases().contains(&identifier))
        })
    }

    /// Tools whose trigger starts `prompt` (case-insensitive) at a word boundary,
    /// paired with the trigger that matched.
    pub fn match_triggers(&self, prompt: &str) -> Vec<(&Arc<dyn Tool>, &str)> {
        let lowered = prompt.trim_start().to_lowercase();
        self.tools
            .values()
            .filter_map(|tool| {
                tool.triggers()
                    .iter()
                    .find(|trigger| starts_with_word(&lowered, trigger))
                    .map(|trigger| (tool, *trigger))
            })
            .collect()
    }

    /// List all registered tool names, sorted.
    pub fn list_names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Execute a tool by name or alias with the given arguments.
    pub async fn execute(&self, tool_name: &str, args: Value) -> ToolOutput {
        match self.resolve(tool_name) {
            Some(tool) => match tool.execute(args).await {
                Ok(content) => ToolOutput {
                    tool_name: tool.name().to_string(),
                    content,
                    is_error: false,
                },
                Err(e) => ToolOutput {
                    tool_name: tool.name().to_string(),
                    content: format!("Error running tool {}: {}", tool.name(), e),
                    is_error: true,
                },
            },
            None => ToolOutput {
                tool_name: tool_name.to_string(),
                content: format!("Tool not found: {}", tool_name),
                is_error: true,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `text` starts with `prefix` and the prefix ends at a word boundary.
fn starts_with_word(text: &str, prefix: &str) -> bool {
    if !text.starts_with(prefix) {
        return false;
    }
    let last_is_word = prefix
        .chars()
        .last()
        .map(|c| c.is_alphanumeric() || c == '_')
        .unwrap_or(false);
    let next_is_word = text[prefix.len()..]
        .chars()
        .next()
        .map(|c| c.is_alphanumeric() || c == '_')
        .unwrap_or(false);
    !(last_is_word && next_is_word)
}
