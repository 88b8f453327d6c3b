pub mod allowlist;
pub mod cheat;
pub mod direct;
pub mod dispatch;
pub mod executor;
pub mod format;
mod guards;
pub mod orchestrator;
pub mod query;
pub mod sanitizer;
pub mod shell_agent;
pub mod translator;
pub mod web;

#[cfg(test)]
mod testing;

use shellbot_core::config::AppConfig;
use shellbot_core::error::BotError;
use shellbot_core::llm::ChatBackend;
use shellbot_core::tool_registry::ToolRegistry;
use std::sync::Arc;

pub use direct::detect_direct;
pub use orchestrator::ShellTaskRunner;
pub use sanitizer::{sanitize, Rejection, ShellCommand};
pub use translator::{CommandTranslator, Translation, TranslationError, Translator};

/// Build the shell agent's retry loop from configuration: model-backed
/// translator, configured executor and, when enabled, the cheat-sheet hint.
pub fn shell_task_runner(
    config: &AppConfig,
    backend: Arc<dyn ChatBackend>,
) -> Result<ShellTaskRunner, BotError> {
    let translator = Arc::new(Translator::new(backend));
    let executor = Arc::new(executor::ShellExecutor::new(&config.executor));
    let mut runner = ShellTaskRunner::new(translator, executor).with_config(&config.shell_agent);
    if config.cheat.enabled {
        runner = runner.with_usage_lookup(Arc::new(cheat::CheatSheet::new(&config.cheat)?));
    }
    Ok(runner)
}

/// Register all built-in tools into the registry.
pub fn register_all(
    registry: &mut ToolRegistry,
    config: &AppConfig,
    backend: Arc<dyn ChatBackend>,
) -> Result<(), BotError> {
    let runner = Arc::new(shell_task_runner(config, backend)?);
    registry.register(Arc::new(shell_agent::ShellAgentTool::new(
        runner,
        config.shell_agent.output_cap,
    )));
    if config.cheat.enabled {
        let sheet = Arc::new(cheat::CheatSheet::new(&config.cheat)?);
        registry.register(Arc::new(cheat::CheatTool::new(sheet)));
    }
    if config.web.enabled {
        let client = Arc::new(web::WebClient::new(&config.web)?);
        registry.register(Arc::new(web::WebSearchTool::new(client.clone())));
        registry.register(Arc::new(web::ScrapeTool::new(client)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::tests::ScriptedChat;

    #[test]
    fn test_register_all() {
        let mut registry = ToolRegistry::new();
        register_all(&mut registry, &AppConfig::default(), Arc::new(ScriptedChat::new(vec![]))).unwrap();
        assert_eq!(
            registry.list_names(),
            ["cheat", "scrape", "shell_agent", "web_search"]
        );
        assert_eq!(registry.resolve("cheat.sh").unwrap().name(), "cheat");
        assert_eq!(registry.resolve("search_and_scrape").unwrap().name(), "scrape");
        assert_eq!(registry.match_triggers("cmd: ls")[0].0.name(), "shell_agent");
        assert_eq!(registry.match_triggers("help tar")[0].0.name(), "cheat");
        assert_eq!(registry.match_triggers("online rust news")[0].0.name(), "web_search");
        let matches = registry.match_triggers("web search rust news");
        assert_eq!((matches[0].0.name(), matches[0].1), ("web_search", "web search"));
        assert_eq!(registry.match_triggers("scrape example.com")[0].0.name(), "scrape");
        assert!(registry.match_triggers("website status").is_empty());
    }

    #[test]
    fn test_optional_tools_can_be_disabled() {
        let mut config = AppConfig::default();
        config.cheat.enabled = false;
        config.web.enabled = false;
        let mut registry = ToolRegistry::new();
        register_all(&mut registry, &config, Arc::new(ScriptedChat::new(vec![]))).unwrap();
        assert_eq!(registry.list_names(), ["shell_agent"]);
    }
}
