//! Validation of literal shell command lines against the allow-list.
//!
//! A [`ShellCommand`] can only be obtained from [`sanitize`], so holding one is
//! proof that the text passed every check below. Rejections are returned as
//! values; there is no shared "last error" state.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use crate::{allowlist, guards};

/// Operators accepted between command segments.
const OPERATORS: &[&str] = &["|", "||", "&&", ";"];

/// Binaries whose arguments are checked for root-path targets.
const ROOT_GUARDED: &[&str] = &["rm", "cp", "mv"];

/// Why a command was refused. `Display` is the human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("empty command")]
    Empty,

    #[error("commands starting with sudo are not allowed")]
    Sudo,

    #[error("multi-line commands are not allowed")]
    MultiLine,

    #[error("command parsing error: no closing quotation for {0}")]
    UnclosedQuote(char),

    #[error("command parsing error: {0}")]
    Unparseable(String),

    #[error("command substitution is not allowed")]
    Substitution,

    #[error("redirections are not allowed")]
    Redirection,

    #[error("operator characters must be spaced out: {0:?}")]
    GluedOperator(String),

    #[error("unsupported operator {0:?}")]
    UnsupportedOperator(String),

    #[error("operator {0:?} is missing a command on one side")]
    DanglingOperator(String),

    #[error("unknown binary {0:?}; only a curated safe list is allowed")]
    UnknownBinary(String),

    #[error("{binary} {argument} is not allowed for safety")]
    DangerousArgument { binary: String, argument: String },
}

impl Rejection {
    pub fn is_unclosed_quote(&self) -> bool {
        matches!(self, Rejection::UnclosedQuote(_))
    }
}

/// A single line of shell text that passed [`sanitize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    text: String,
    binaries: Vec<String>,
}

impl ShellCommand {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Leading program of the first segment.
    pub fn primary_binary(&self) -> &str {
        self.binaries.first().map(String::as_str).unwrap_or_default()
    }

    /// Leading program of every segment, in order.
    pub fn binaries(&self) -> &[String] {
        &self.binaries
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for ShellCommand {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

/// Validate `raw` and return it (minus any fence or quote wrapper) unchanged.
///
/// The accepted text is never re-serialized from tokens, so pipelines keep
/// their original spelling. Sanitizing an accepted command again yields the
/// same command.
pub fn sanitize(raw: &str) -> Result<ShellCommand, Rejection> {
    match check(raw) {
        Ok(command) => {
            info!("accepted sanitized command: {:?}", command.as_str());
            Ok(command)
        }
        Err(rejection) => {
            debug!("rejected command {:?}: {}", raw, rejection);
            Err(rejection)
        }
    }
}

fn check(raw: &str) -> Result<ShellCommand, Rejection> {
    let text = unwrap(raw);
    if text.is_empty() {
        return Err(Rejection::Empty);
    }
    if text.to_lowercase().starts_with("sudo") {
        return Err(Rejection::Sudo);
    }
    if text.contains(|c: char| c == '\n' || c == '\r') {
        return Err(Rejection::MultiLine);
    }

    scan(text)?;

    let tokens = shlex::split(text)
        .ok_or_else(|| Rejection::Unparseable("unable to split command into words".into()))?;

    let mut segments: Vec<(String, Vec<String>)> = Vec::new();
    let mut need_binary = true;
    let mut last_operator: Option<String> = None;

    for token in tokens {
        if OPERATORS.contains(&token.as_str()) {
            if need_binary {
                return Err(Rejection::DanglingOperator(token));
            }
            need_binary = true;
            last_operator = Some(token);
            continue;
        }

        if need_binary {
            if !allowlist::is_allowed(&token) {
                return Err(Rejection::UnknownBinary(token));
            }
            segments.push((token, Vec::new()));
            need_binary = false;
            continue;
        }

        if let Some((_, args)) = segments.last_mut() {
            args.push(token);
        }
    }

    if need_binary {
        return Err(match last_operator {
            Some(op) => Rejection::DanglingOperator(op),
            None => Rejection::Empty,
        });
    }

    for (binary, args) in &segments {
        check_segment(binary, args)?;
    }

    Ok(ShellCommand {
        text: text.to_string(),
        binaries: segments.into_iter().map(|(binary, _)| binary).collect(),
    })
}

/// Strip fenced code blocks and matching quote/backtick pairs until none remain.
///
/// A quote pair is only removed when the inner text does not contain that
/// quote character, so `"a" b "c"` keeps its quotes.
fn unwrap(raw: &str) -> &str {
    let mut text = raw.trim();
    loop {
        if text.len() >= 6 && text.starts_with("```") && text.ends_with("```") {
            let inner = text[3..text.len() - 3].trim();
            text = match inner.split_once('\n') {
                Some((first, rest)) if is_language_tag(first.trim()) => rest.trim(),
                _ => inner,
            };
            continue;
        }

        let mut chars = text.chars();
        if let (Some(first), Some(last)) = (chars.next(), chars.next_back()) {
            if first == last && matches!(first, '`' | '"' | '\'') {
                let inner = &text[1..text.len() - 1];
                if !inner.contains(first) {
                    text = inner.trim();
                    continue;
                }
            }
        }

        return text;
    }
}

fn is_language_tag(line: &str) -> bool {
    !line.is_empty()
        && line
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-'))
}

#[derive(Clone, Copy, PartialEq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Quote-aware pass over the raw text: quoting must balance, substitutions and
/// redirections are refused, and unquoted operator runs must be one of
/// [`OPERATORS`] with whitespace on both sides.
fn scan(text: &str) -> Result<(), Rejection> {
    let chars: Vec<char> = text.chars().collect();
    let mut quote = Quote::None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                }
            }
            Quote::Double => match c {
                '\\' => i += 1,
                '"' => quote = Quote::None,
                '`' => return Err(Rejection::Substitution),
                '$' if chars.get(i + 1) == Some(&'(') => return Err(Rejection::Substitution),
                _ => {}
            },
            Quote::None => match c {
                '\\' => i += 1,
                '\'' => quote = Quote::Single,
                '"' => quote = Quote::Double,
                '`' => return Err(Rejection::Substitution),
                '$' if chars.get(i + 1) == Some(&'(') => return Err(Rejection::Substitution),
                '<' | '>' => return Err(Rejection::Redirection),
                '|' | '&' | ';' => {
                    let end = (i..chars.len())
                        .find(|&j| !matches!(chars[j], '|' | '&' | ';'))
                        .unwrap_or(chars.len());
                    let run: String = chars[i..end].iter().collect();
                    if !OPERATORS.contains(&run.as_str()) {
                        return Err(Rejection::UnsupportedOperator(run));
                    }
                    let glued_before = i > 0 && !chars[i - 1].is_whitespace();
                    let glued_after = end < chars.len() && !chars[end].is_whitespace();
                    if glued_before || glued_after {
                        return Err(Rejection::GluedOperator(word_around(&chars, i, end)));
                    }
                    i = end;
                    continue;
                }
                _ => {}
            },
        }
        i += 1;
    }

    match quote {
        Quote::Single => Err(Rejection::UnclosedQuote('\'')),
        Quote::Double => Err(Rejection::UnclosedQuote('"')),
        Quote::None => Ok(()),
    }
}

/// The whitespace-delimited word containing `chars[start..end]`.
fn word_around(chars: &[char], start: usize, end: usize) -> String {
    let from = chars[..start]
        .iter()
        .rposition(|c| c.is_whitespace())
        .map(|p| p + 1)
        .unwrap_or(0);
    let to = chars[end..]
        .iter()
        .position(|c| c.is_whitespace())
        .map(|p| p + end)
        .unwrap_or(chars.len());
    chars[from..to].iter().collect()
}

fn check_segment(binary: &str, args: &[String]) -> Result<(), Rejection> {
    let root_target = args.iter().find(|argument| {
        (ROOT_GUARDED.contains(&binary) && is_root_path(argument))
            || (binary == "rm" && argument.as_str() == "--no-preserve-root")
    });
    match root_target
        .cloned()
        .or_else(|| guards::escape_argument(binary, args))
    {
        Some(argument) => Err(Rejection::DangerousArgument {
            binary: binary.to_string(),
            argument,
        }),
        None => Ok(()),
    }
}

/// `/`, `//`, `/*`, `/.` and friends.
fn is_root_path(argument: &str) -> bool {
    argument.starts_with('/') && argument.chars().all(|c| matches!(c, '/' | '.' | '*'))
}
