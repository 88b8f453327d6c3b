use std::sync::Arc;

use serde_json::Value;
use shellbot_core::llm::Summarizer;
use shellbot_core::tool_registry::ToolRegistry;
use tracing::{debug, warn};

use crate::format::{format_payload, ToolPayload};
use crate::query::QueryTranslator;
use crate::web::WEB_SEARCH_TOOL;

pub const NO_WEB_QUERY: &str = "I couldn't infer a web search query from that request.";

/// Tools whose raw output is returned without a TLDR.
const SKIP_TLDR: &[&str] = &["shell_agent", "cheat"];

/// Rendered tool output, with the TLDR kept apart when requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolReply {
    pub text: String,
    pub tldr: Option<String>,
}

/// Runs registry tools and attaches an optional summary of their output.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    summarizer: Option<Arc<dyn Summarizer>>,
    query_translator: Option<Arc<QueryTranslator>>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            summarizer: None,
            query_translator: None,
        }
    }

    /// Rewrite `web_search` queries with `translator` before running the tool.
    pub fn with_query_translator(mut self, translator: Arc<QueryTranslator>) -> Self {
        self.query_translator = Some(translator);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute `tool_name` (name or alias). With `tldr_separate` the summary is
    /// returned in [`ToolReply::tldr`]; otherwise it is appended to the text.
    pub async fn call(&self, tool_name: &str, mut args: Value, tldr_separate: bool) -> ToolReply {
        if let Err(reply) = self.rewrite_query(tool_name, &mut args).await {
            return reply;
        }
        let output = self.registry.execute(tool_name, args).await;
        let text = format_payload(&ToolPayload::Text(output.content), usize::MAX);

        if output.is_error || SKIP_TLDR.contains(&output.tool_name.as_str()) {
            debug!("Skipping TLDR for {}; returning raw tool output only", output.tool_name);
            return ToolReply { text, tldr: None };
        }

        let Some(summarizer) = &self.summarizer else {
            return ToolReply { text, tldr: None };
        };
        let summary = match summarizer.summarize(&output.tool_name, &text).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Error generating TLDR for tool {}: {}", output.tool_name, e);
                return ToolReply { text, tldr: None };
            }
        };

        if tldr_separate {
            ToolReply {
                text,
                tldr: Some(summary),
            }
        } else {
            ToolReply {
                text: format!("{}\n\nTLDR: {}", text, summary),
                tldr: None,
            }
        }
    }

    /// Replace a non-empty `web_search` query with the translated one. A
    /// request that yields no query ends the call.
    async fn rewrite_query(&self, tool_name: &str, args: &mut Value) -> Result<(), ToolReply> {
        let Some(translator) = &self.query_translator else {
            return Ok(());
        };
        let is_search = self
            .registry
            .resolve(tool_name)
            .is_some_and(|tool| tool.name() == WEB_SEARCH_TOOL);
        if !is_search {
            return Ok(());
        }
        let Some(query) = args.get("query").and_then(Value::as_str).map(str::trim) else {
            return Ok(());
        };
        if query.is_empty() {
            return Ok(());
        }

        match translator.translate(query).await {
            Some(translated) => {
                debug!("web search query {:?} rewritten to {:?}", query, translated);
                args["query"] = Value::String(translated);
                Ok(())
            }
            None => {
                warn!("Query translation failed for web_search; aborting tool call.");
                Err(ToolReply {
                    text: NO_WEB_QUERY.to_string(),
                    tldr: None,
                })
            }
        }
    }
}
