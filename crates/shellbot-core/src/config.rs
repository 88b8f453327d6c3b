use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application configuration, loaded from TOML.
///
/// The shell command allow-list is intentionally absent: it is compiled into
/// `shellbot-tools` so the trust boundary cannot be widened without a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    /// Explicit provider chain. When empty, `provider` is used alone.
    pub providers: Vec<ProviderEntry>,
    pub executor: ExecutorConfig,
    pub shell_agent: ShellAgentConfig,
    pub cheat: CheatConfig,
    pub web: WebConfig,
    pub tldr: TldrConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            providers: Vec::new(),
            executor: ExecutorConfig::default(),
            shell_agent: ShellAgentConfig::default(),
            cheat: CheatConfig::default(),
            web: WebConfig::default(),
            tldr: TldrConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from default path (~/.config/shellbot/config.toml),
    /// falling back to defaults if the file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shellbot")
            .join("config.toml")
    }

    /// Data directory for REPL history.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shellbot")
    }
}

/// Default LLM endpoint (used alone when `providers` is empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL for the OpenAI-compatible API.
    pub api_base: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Client-side deadline for one completion request.
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:11434/v1".into(),
            model: "llama3.2".into(),
            api_key: None,
            max_tokens: 256,
            temperature: 0.0,
            timeout_secs: 30,
        }
    }
}

/// One entry of an explicit provider chain, e.g. a local Ollama and a cloud fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub api_base: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable to read the key from when `api_key` is unset.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Lower is tried first.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Consecutive failures after which the provider is skipped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_priority() -> u32 {
    1
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

/// Shell execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub mode: ExecutorMode,
    /// Hard deadline for one command.
    pub timeout_secs: u64,
    /// Image used in docker mode.
    pub docker_image: String,
    /// Working directory for direct mode (current dir when unset) or inside the container.
    pub work_dir: Option<String>,
    /// Bytes kept from each of stdout and stderr; the rest is read and discarded.
    pub max_output_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutorMode::Direct,
            timeout_secs: 20,
            docker_image: "debian:stable-slim".into(),
            work_dir: None,
            max_output_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorMode {
    /// `bash -c` on the host, in its own process group.
    Direct,
    /// `docker run --rm --network=none --read-only`.
    Docker,
}

/// Retry loop settings for the shell agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellAgentConfig {
    pub max_attempts: usize,
    /// Re-translate the original instruction after retries and refuse a
    /// successful result whose command differs from it.
    pub compliance_check: bool,
    /// Per-stream character cap applied by the output formatter.
    pub output_cap: usize,
}

impl Default for ShellAgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            compliance_check: false,
            output_cap: 16_000,
        }
    }
}

/// Cheat-sheet lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheatConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for CheatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://cheat.sh".into(),
            timeout_secs: 5,
        }
    }
}

/// Web search and page scraping tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    /// DuckDuckGo HTML endpoint; `q` is appended as a query parameter.
    pub search_url: String,
    /// Tried when the primary endpoint fails or returns nothing.
    pub lite_search_url: String,
    pub timeout_secs: u64,
    /// Refuse to scrape loopback, private and link-local addresses.
    pub block_private_addresses: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_url: "https://html.duckduckgo.com/html/".into(),
            lite_search_url: "https://lite.duckduckgo.com/lite/".into(),
            timeout_secs: 5,
            block_private_addresses: true,
        }
    }
}

/// TLDR summaries for non-shell tool output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TldrConfig {
    pub enabled: bool,
}

impl Default for TldrConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
