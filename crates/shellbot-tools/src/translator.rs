//! Natural language to shell command translation.
//!
//! The translator asks a chat model for exactly one command line and pushes
//! the reply through the sanitizer. Two narrow repairs are applied to model
//! output only, never to user input: closing a single unterminated quote, and
//! keeping just the leading segment when the model appended an unsafe tail.

use std::sync::Arc;

use async_trait::async_trait;
use shellbot_core::llm::ChatBackend;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::allowlist::ALLOWED_COMMANDS;
use crate::direct::detect_direct;
use crate::sanitizer::{sanitize, Rejection, ShellCommand};

/// How a translation was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationSource {
    /// The instruction already was a safe command.
    Direct,
    /// The model reply passed the sanitizer as-is.
    Model,
    /// The model reply was missing one closing quote.
    QuoteRepaired,
    /// Only the leading segment of the model reply was kept.
    Narrowed { discarded: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub command: ShellCommand,
    pub source: TranslationSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("instruction was empty")]
    EmptyInstruction,

    #[error("model explicitly replied with NONE (no safe command)")]
    ModelDeclined,

    #[error("model returned an empty reply")]
    EmptyReply,

    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("exception during translation: {0}")]
    Backend(String),
}

/// Turns an instruction into one sanitized command. Implementations must not
/// keep per-call state; the orchestrator calls them repeatedly.
#[async_trait]
pub trait CommandTranslator: Send + Sync {
    async fn translate(&self, instruction: &str) -> Result<Translation, TranslationError>;
}

/// [`CommandTranslator`] backed by a chat model.
pub struct Translator {
    backend: Arc<dyn ChatBackend>,
    system_prompt: String,
}

impl Translator {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            system_prompt: system_prompt(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

fn system_prompt() -> String {
    format!(
        "You convert natural language requests into exactly one Linux shell command line. \
         Never return a command that omits a key requirement from the user's request. \
         Prefer these tools; commands outside this list will be refused: {}. \
         Pipes and chaining with ; or && are allowed when needed, separated by spaces. \
         Do not use sudo, redirections, command substitution or cd. \
         Avoid interactive or blocking commands; you are not in an interactive shell. \
         Limit long output with a pipe such as `| head -n 500`. \
         Use relative paths as a user would. \
         Always close every opening quote character; never leave a string unterminated. \
         Respond ONLY with the command: no commentary, prompts, explanations or extra lines. \
         If no safe command can fulfil the request, respond with the single word NONE.",
        ALLOWED_COMMANDS.join(", ")
    )
}

#[async_trait]
impl CommandTranslator for Translator {
    async fn translate(&self, instruction: &str) -> Result<Translation, TranslationError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(TranslationError::EmptyInstruction);
        }

        if let Some(command) = detect_direct(instruction) {
            debug!("instruction is a direct command: {}", command);
            return Ok(Translation {
                command,
                source: TranslationSource::Direct,
            });
        }

        debug!("translating instruction: {}", instruction);
        let reply = self
            .backend
            .complete(&self.system_prompt, instruction)
            .await
            .map_err(|e| {
                warn!("unable to translate instruction to command: {}", e);
                TranslationError::Backend(e.to_string())
            })?;
        debug!("translator reply: {:?}", reply);

        let candidate = extract_command(&reply);
        if candidate.is_empty() {
            return Err(TranslationError::EmptyReply);
        }
        if candidate.eq_ignore_ascii_case("NONE") {
            return Err(TranslationError::ModelDeclined);
        }

        accept_candidate(candidate)
    }
}

/// Sanitize a model candidate, applying quote repair and then narrowing.
fn accept_candidate(candidate: &str) -> Result<Translation, TranslationError> {
    let rejection = match sanitize(candidate) {
        Ok(command) => {
            return Ok(Translation {
                command,
                source: TranslationSource::Model,
            })
        }
        Err(rejection) => rejection,
    };

    if rejection.is_unclosed_quote() {
        if let Some(repaired) = close_unterminated_quote(candidate) {
            if let Ok(command) = sanitize(&repaired) {
                info!("closed an unterminated quote in model output: {}", command);
                return Ok(Translation {
                    command,
                    source: TranslationSource::QuoteRepaired,
                });
            }
        }
    }

    if let Some(idx) = candidate.find(|c: char| matches!(c, ';' | '&' | '|')) {
        let leading = candidate[..idx].trim();
        if !leading.is_empty() {
            if let Ok(command) = sanitize(leading) {
                let discarded = candidate[idx..].trim().to_string();
                info!(
                    "model suggestion looked unsafe; keeping leading segment {:?}, dropped {:?}",
                    command.as_str(),
                    discarded
                );
                return Ok(Translation {
                    command,
                    source: TranslationSource::Narrowed { discarded },
                });
            }
        }
    }

    debug!("model suggestion {:?} rejected: {}", candidate, rejection);
    Err(TranslationError::Rejected(rejection))
}

/// Reduce a raw model reply to one candidate line: drop a `command:` label and
/// opening/closing fence lines, then keep the first remaining line.
fn extract_command(reply: &str) -> &str {
    let mut text = reply.trim();
    if text
        .get(..8)
        .is_some_and(|label| label.eq_ignore_ascii_case("command:"))
    {
        text = text[8..].trim();
    }
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !is_fence_line(line))
        .unwrap_or_default()
}

fn is_fence_line(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("```") else {
        return false;
    };
    !rest.contains('`')
        && rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-'))
}

/// Append the one quote character that has an odd count, checking `"`, `'`
/// and backtick in that order.
fn close_unterminated_quote(command: &str) -> Option<String> {
    let command = command.trim();
    if command.is_empty() {
        return None;
    }
    ['"', '\'', '`']
        .into_iter()
        .find(|q| command.matches(*q).count() % 2 == 1)
        .map(|q| format!("{command}{q}"))
}
