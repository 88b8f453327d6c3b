use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use shellbot_core::config::CheatConfig;
use shellbot_core::error::BotError;
use shellbot_core::tool_registry::Tool;
use tracing::debug;
use url::Url;

/// cheat.sh answers plain text only to curl-like clients.
const CURL_USER_AGENT: &str = "curl 8.18.0 (x86_64-pc-linux-gnu) libcurl/8.18.0";

/// Short usage reference for one program, used as a hint source.
#[async_trait]
pub trait UsageLookup: Send + Sync {
    /// `None` when no hint is available; failures are never surfaced.
    async fn fetch_usage(&self, binary: &str) -> Option<String>;
}

/// HTTP client for cheat.sh-style endpoints (`<base>/<program>`).
pub struct CheatSheet {
    client: reqwest::Client,
    base_url: Url,
}

impl CheatSheet {
    pub fn new(config: &CheatConfig) -> Result<Self, BotError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| BotError::Config(format!("invalid cheat base_url: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BotError::Config(format!(
                "invalid cheat base_url: {}",
                config.base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(CURL_USER_AGENT)
            .build()?;
        Ok(Self { client, base_url })
    }

    fn page_url(&self, primary: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(primary);
        }
        url
    }

    /// Fetch and clean the page for the first token of `command`.
    pub async fn fetch(&self, command: &str) -> Result<String, BotError> {
        let primary = command.split_whitespace().next().ok_or_else(|| BotError::ToolExecution {
            tool_name: "cheat".into(),
            message: "no command provided".into(),
        })?;

        let url = self.page_url(primary);
        debug!("Fetching usage reference: {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() || body.trim().is_empty() {
            return Err(BotError::ToolExecution {
                tool_name: "cheat".into(),
                message: format!("status {}", status.as_u16()),
            });
        }
        Ok(clean_cheat_output(&body))
    }
}

#[async_trait]
impl UsageLookup for CheatSheet {
    async fn fetch_usage(&self, binary: &str) -> Option<String> {
        match self.fetch(binary).await {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                debug!("No usage reference for {}: {}", binary, e);
                None
            }
        }
    }
}

fn ansi_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").ok()).as_ref()
}

/// Strip ANSI colour codes, collapse whitespace inside each line and drop
/// blank lines.
pub fn clean_cheat_output(text: &str) -> String {
    let stripped = match ansi_regex() {
        Some(re) => re.replace_all(text, ""),
        None => text.into(),
    };
    stripped
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Registry tool exposing the cheat-sheet lookup directly to users.
pub struct CheatTool {
    sheet: Arc<CheatSheet>,
}

impl CheatTool {
    pub fn new(sheet: Arc<CheatSheet>) -> Self {
        Self { sheet }
    }
}

#[derive(Deserialize)]
struct CheatArgs {
    command: String,
}

#[async_trait]
impl Tool for CheatTool {
    fn name(&self) -> &str {
        "cheat"
    }

    fn description(&self) -> &str {
        "Fetch plain-text usage/help from cheat.sh for a given command"
    }

    fn aliases(&self) -> &[&str] {
        &["cheat.sh", "fetch_cheat"]
    }

    fn triggers(&self) -> &[&str] {
        &["cheat", "help"]
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Primary command to look up on cheat.sh"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, BotError> {
        let args: CheatArgs = serde_json::from_value(args)?;
        let primary = args
            .command
            .split_whitespace()
            .next()
            .ok_or_else(|| BotError::ToolExecution {
                tool_name: "cheat".into(),
                message: "no command provided".into(),
            })?
            .to_string();

        match self.sheet.fetch(&primary).await {
            Ok(text) => Ok(text),
            Err(BotError::ToolExecution { message, .. }) => {
                Ok(format!("Error fetching cheat.sh for {}: {}", primary, message))
            }
            Err(e) => Ok(format!("Error fetching cheat.sh for {}: {}", primary, e)),
        }
    }
}
