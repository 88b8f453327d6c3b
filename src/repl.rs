use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::{Config as RlConfig, DefaultEditor};
use serde_json::{json, Map, Value};
use shellbot_core::config::{AppConfig, ExecutorMode};
use shellbot_core::directive::parse_directive;
use shellbot_core::tool_registry::Tool;
use shellbot_tools::allowlist::ALLOWED_COMMANDS;
use shellbot_tools::cheat::CheatSheet;
use shellbot_tools::dispatch::{ToolDispatcher, ToolReply};
use shellbot_tools::{sanitize, CommandTranslator, Translator};

const BANNER: &str = r#"
  ╔═══════════════════════════════════════════╗
  ║              shellbot v0.1.0              ║
  ║   Plain language in, safe commands out    ║
  ╚═══════════════════════════════════════════╝

  Type an instruction or a literal command and press Enter.
  Commands:
    /check <cmd>      — Check a command against the safety rules
    /translate <text> — Show the command for an instruction without running it
    /cheat <program>  — Show the cheat.sh reference for a program
    /tools            — List available tools
    /allowed          — List the allowed programs
    /config           — Show current config
    /help             — Show this help
    /exit             — Quit
"#;

/// Run the interactive REPL.
pub async fn run(config: AppConfig, dispatcher: ToolDispatcher, translator: Translator) -> Result<()> {
    println!("{}", BANNER);
    println!(
        "  Model: {}  |  Endpoint: {}",
        config.provider.model, config.provider.api_base
    );

    if config.executor.mode == ExecutorMode::Direct {
        println!("\x1b[1;33m  ⚠  Commands run directly on this machine as the current user.\x1b[0m");
        println!("\x1b[1;33m     Set [executor] mode = \"docker\" in config for isolated execution.\x1b[0m");
    }
    println!();

    // Set up rustyline.
    let rl_config = RlConfig::builder().auto_add_history(true).build();
    let history_path = AppConfig::data_dir().join("repl_history.txt");
    let mut rl = DefaultEditor::with_config(rl_config)?;
    let _ = rl.load_history(&history_path);

    let prompt = "\x1b[1;36mshellbot\x1b[0m \x1b[1;32m❯\x1b[0m ";
    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                if input.starts_with('/') {
                    let handled = handle_command(input, &dispatcher, &translator, &config).await?;
                    if !handled {
                        break; // /exit
                    }
                    continue;
                }

                let reply = route(input, &dispatcher).await;
                print_reply(&reply);
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    // Save history.
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = rl.save_history(&history_path);

    Ok(())
}

/// Directive first, then a trigger prefix, otherwise the shell agent.
async fn route(input: &str, dispatcher: &ToolDispatcher) -> ToolReply {
    let registry = dispatcher.registry();

    match parse_directive(input, registry) {
        Ok(Some(directive)) => {
            return dispatcher
                .call(&directive.tool_name, directive.parameters, false)
                .await
        }
        Ok(None) => {}
        Err(e) => {
            return ToolReply {
                text: e.to_string(),
                tldr: None,
            }
        }
    }

    let trimmed = input.trim_start();
    if let Some((tool, trigger)) = registry.match_triggers(trimmed).into_iter().next() {
        let rest = trimmed.get(trigger.len()..).unwrap_or_default().trim();
        if rest.is_empty() {
            return ToolReply {
                text: format!("Tell {} what to do after '{}'.", tool.name(), trigger),
                tldr: None,
            };
        }
        let name = tool.name().to_string();
        let args = single_argument(tool.as_ref(), rest);
        return dispatcher.call(&name, args, false).await;
    }

    dispatcher
        .call("shell_agent", json!({ "instruction": input }), false)
        .await
}

/// Map free text onto a tool's first required parameter.
fn single_argument(tool: &dyn Tool, text: &str) -> Value {
    let schema = tool.parameters_schema();
    let name = schema
        .get("required")
        .and_then(Value::as_array)
        .and_then(|required| required.first())
        .and_then(Value::as_str)
        .unwrap_or("instruction")
        .to_string();
    let mut map = Map::new();
    map.insert(name, Value::String(text.to_string()));
    Value::Object(map)
}

fn print_reply(reply: &ToolReply) {
    println!("{}", reply.text);
    if let Some(tldr) = &reply.tldr {
        println!("\x1b[1;33mTLDR\x1b[0m: {}", tldr);
    }
}

/// Handle a slash command. Returns `true` to continue the loop, `false` to exit.
async fn handle_command(
    input: &str,
    dispatcher: &ToolDispatcher,
    translator: &Translator,
    config: &AppConfig,
) -> Result<bool> {
    let (cmd, arg) = match input.split_once(' ') {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (input, ""),
    };

    match cmd {
        "/exit" | "/quit" | "/q" => {
            println!("Goodbye!");
            return Ok(false);
        }
        "/check" => match sanitize(arg) {
            Ok(command) => println!("  \x1b[0;32m✓\x1b[0m {}", command),
            Err(rejection) => println!("  \x1b[0;31m✗\x1b[0m {}", rejection),
        },
        "/translate" => match translator.translate(arg).await {
            Ok(translation) => println!("  {}  ({:?})", translation.command, translation.source),
            Err(e) => println!("  \x1b[0;31m✗\x1b[0m {}", e),
        },
        "/cheat" => {
            if arg.is_empty() {
                println!("Usage: /cheat <program>");
            } else {
                let sheet = CheatSheet::new(&config.cheat)?;
                match sheet.fetch(arg).await {
                    Ok(text) => println!("{}", text),
                    Err(e) => println!("  \x1b[0;31m✗\x1b[0m {}", e),
                }
            }
        }
        "/tools" => {
            let registry = dispatcher.registry();
            let names = registry.list_names();
            if names.is_empty() {
                println!("  No tools registered.");
            } else {
                println!("  Available tools ({}):", names.len());
                for name in names {
                    if let Some(tool) = registry.get(name) {
                        println!("    • {} — {}", name, tool.description());
                        if !tool.triggers().is_empty() {
                            println!("      triggers: {}", tool.triggers().join(", "));
                        }
                    }
                }
            }
        }
        "/allowed" => {
            println!("  {}", ALLOWED_COMMANDS.join(" "));
        }
        "/config" => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
        }
        "/help" | "/?" => {
            println!("  /check <cmd>      — Check a command against the safety rules");
            println!("  /translate <text> — Show the command for an instruction without running it");
            println!("  /cheat <program>  — Show the cheat.sh reference for a program");
            println!("  /tools            — List available tools");
            println!("  /allowed          — List the allowed programs");
            println!("  /config           — Show current config");
            println!("  /help             — Show this help");
            println!("  /exit             — Quit");
            println!();
            println!("  Anything else goes to the shell agent. Prefixes such as 'cmd:',");
            println!("  'help <program>', 'search <topic>' or 'scrape <url>' route to a");
            println!("  specific tool; 'run tool <name> <args>'");
            println!("  or an inline JSON payload calls a tool explicitly.");
        }
        _ => {
            println!(
                "Unknown command: {}. Type /help for available commands.",
                cmd
            );
        }
    }

    Ok(true)
}
