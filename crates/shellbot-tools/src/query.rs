//! Rewrites a free-form request into a web search query.

use std::sync::Arc;

use shellbot_core::llm::ChatBackend;
use tracing::{debug, error};

const QUERY_SYSTEM_PROMPT: &str = "You receive a user follow-up or instruction plus optional context. \
     Rewrite it into a single concise web search query that will retrieve the requested information. \
     If the user refers to doing the same thing as before, infer the subject from the context provided. \
     Respond with only the search query text: no explanations, quotes, prefixes or extra lines. \
     If you cannot produce a reasonable query, respond with the single word NONE.";

pub struct QueryTranslator {
    backend: Arc<dyn ChatBackend>,
}

impl QueryTranslator {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// `None` when the instruction is blank, the model fails, or it answers
    /// `NONE` or nothing.
    pub async fn translate(&self, instruction: &str) -> Option<String> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return None;
        }

        let reply = match self.backend.complete(QUERY_SYSTEM_PROMPT, instruction).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Unable to translate instruction to web query: {}", e);
                return None;
            }
        };
        debug!("query translation reply: {:?}", reply);

        let query = reply.trim().lines().next().unwrap_or_default().trim();
        if query.is_empty() || query.eq_ignore_ascii_case("NONE") {
            return None;
        }
        Some(query.to_string())
    }
}
