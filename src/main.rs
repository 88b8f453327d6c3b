mod repl;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use shellbot_core::config::AppConfig;
use shellbot_core::llm::{ChatBackend, LlmSummarizer, OpenAiChat};
use shellbot_core::tool_registry::ToolRegistry;
use shellbot_tools::cheat::CheatSheet;
use shellbot_tools::dispatch::ToolDispatcher;
use shellbot_tools::format::format_execution;
use shellbot_tools::query::QueryTranslator;
use shellbot_tools::translator::TranslationSource;
use shellbot_tools::{sanitize, CommandTranslator, Translator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "shellbot",
    about = "Turn plain-language requests into allow-listed shell commands and run them",
    version,
    author
)]
struct Cli {
    /// Path to config file (default: ~/.config/shellbot/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the model name
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Override the API base URL
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive shell agent (default)
    Repl,

    /// Translate, run and retry one instruction
    Run {
        /// Print the full result, including the attempt trace, as JSON
        #[arg(long)]
        json: bool,
        /// Instruction or literal command
        #[arg(required = true, trailing_var_arg = true)]
        instruction: Vec<String>,
    },

    /// Translate an instruction to a command without running it
    Translate {
        #[arg(required = true, trailing_var_arg = true)]
        instruction: Vec<String>,
    },

    /// Check a literal command against the safety rules
    Check {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Show the cheat.sh usage reference for a program
    Cheat { binary: String },

    /// List registered tools
    Tools,

    /// Show or manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize default configuration file
    Init,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up tracing.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "shellbot=info,warn".into()))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load config.
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    // Apply CLI overrides.
    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(api_base) = &cli.api_base {
        config.provider.api_base = api_base.clone();
    }

    if let Some(Commands::Config { action }) = &cli.command {
        return handle_config_command(action.as_ref(), &config, &config_path);
    }
    if let Some(Commands::Check { command }) = &cli.command {
        return check_command(&command.join(" "));
    }

    let backend: Arc<dyn ChatBackend> = Arc::new(OpenAiChat::from_config(&config)?);

    // Build tool registry with all built-in tools.
    let mut registry = ToolRegistry::new();
    shellbot_tools::register_all(&mut registry, &config, backend.clone())?;
    let registry = Arc::new(registry);

    tracing::info!(
        "Loaded {} tools, model: {}, endpoint: {}",
        registry.len(),
        config.provider.model,
        config.provider.api_base,
    );

    let mut dispatcher = ToolDispatcher::new(registry.clone());
    if config.tldr.enabled {
        dispatcher = dispatcher.with_summarizer(Arc::new(LlmSummarizer::new(backend.clone())));
    }
    if config.web.enabled {
        dispatcher = dispatcher.with_query_translator(Arc::new(QueryTranslator::new(backend.clone())));
    }
    let translator = Translator::new(backend.clone());

    match cli.command {
        Some(Commands::Run { json, instruction }) => {
            let runner = shellbot_tools::shell_task_runner(&config, backend)?;
            let result = runner.run_shell_task(&instruction.join(" ")).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", format_execution(&result, config.shell_agent.output_cap));
            }
            if result.has_error() {
                std::process::exit(1);
            }
        }
        Some(Commands::Translate { instruction }) => {
            match translator.translate(&instruction.join(" ")).await {
                Ok(translation) => {
                    println!("{}", translation.command);
                    match translation.source {
                        TranslationSource::Narrowed { discarded } => {
                            eprintln!("note: dropped unsafe tail {:?}", discarded)
                        }
                        TranslationSource::QuoteRepaired => {
                            eprintln!("note: closed an unterminated quote")
                        }
                        TranslationSource::Direct | TranslationSource::Model => {}
                    }
                }
                Err(e) => bail!("no command: {}", e),
            }
        }
        Some(Commands::Cheat { binary }) => {
            let sheet = CheatSheet::new(&config.cheat)?;
            println!("{}", sheet.fetch(&binary).await?);
        }
        Some(Commands::Tools) => {
            for schema in registry.schemas() {
                println!("{} — {}", schema.name, schema.description);
            }
        }
        Some(Commands::Repl) | None => {
            repl::run(config, dispatcher, translator).await?;
        }
        Some(Commands::Config { .. }) | Some(Commands::Check { .. }) => {}
    }

    Ok(())
}

fn check_command(command: &str) -> Result<()> {
    match sanitize(command) {
        Ok(command) => {
            println!("ok: {}", command);
            Ok(())
        }
        Err(rejection) => bail!("rejected: {}", rejection),
    }
}

fn handle_config_command(
    action: Option<&ConfigAction>,
    config: &AppConfig,
    path: &std::path::Path,
) -> Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
        }
        Some(ConfigAction::Init) => {
            if path.exists() {
                println!("Config already exists at: {}", path.display());
            } else {
                config.save_to(path)?;
                println!("Created default config at: {}", path.display());
            }
        }
        Some(ConfigAction::Path) => {
            println!("{}", path.display());
        }
    }
    Ok(())
}
