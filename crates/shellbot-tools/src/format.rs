//! Transport-agnostic rendering of tool output.

use serde_json::Value;
use shellbot_core::types::ExecutionResult;

/// Default per-stream character cap.
pub const DEFAULT_OUTPUT_CAP: usize = 16_000;

pub const TRUNCATION_MARKER: &str = "\n... (output truncated)";

pub const NO_DATA: &str = "Tool returned no data.";

/// Raw tool output before rendering.
#[derive(Debug, Clone)]
pub enum ToolPayload {
    Execution(ExecutionResult),
    Text(String),
    Structured(Value),
    Empty,
}

impl From<ExecutionResult> for ToolPayload {
    fn from(result: ExecutionResult) -> Self {
        ToolPayload::Execution(result)
    }
}

impl From<String> for ToolPayload {
    fn from(text: String) -> Self {
        ToolPayload::Text(text)
    }
}

impl From<Value> for ToolPayload {
    fn from(value: Value) -> Self {
        ToolPayload::Structured(value)
    }
}

pub fn format_payload(payload: &ToolPayload, cap: usize) -> String {
    match payload {
        ToolPayload::Empty => NO_DATA.to_string(),
        ToolPayload::Execution(result) => format_execution(result, cap),
        ToolPayload::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                "Tool returned an empty response.".to_string()
            } else {
                text.to_string()
            }
        }
        ToolPayload::Structured(value) => format_value(value, cap),
    }
}

fn format_value(value: &Value, cap: usize) -> String {
    match value {
        Value::Null => NO_DATA.to_string(),
        Value::String(text) => format_payload(&ToolPayload::Text(text.clone()), cap),
        Value::Object(map) if map.contains_key("command") && map.contains_key("exit_code") => {
            match serde_json::from_value::<ExecutionResult>(value.clone()) {
                Ok(result) => format_execution(&result, cap),
                Err(_) => pretty(value),
            }
        }
        Value::Array(items) if items.is_empty() => "Tool returned an empty list.".to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(_) => pretty(value),
        other => other.to_string(),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Render a shell result as `$ <command>` followed by either the output or an
/// error block. Every stream is capped at `cap` characters.
pub fn format_execution(result: &ExecutionResult, cap: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    if !result.command.is_empty() {
        lines.push(format!("$ {}", result.command));
    }

    let stdout = result.stdout.trim();
    let stderr = result.stderr.trim();

    if result.is_policy_failure() {
        lines.push(format!("Policy failure (exit code {}):", result.exit_code));
        lines.push(truncate(stderr, cap));
    } else if result.has_error() {
        lines.push(format!("Exit code: {}", result.exit_code));
        if !stdout.is_empty() {
            lines.push("Stdout:".to_string());
            lines.push(truncate(stdout, cap));
        }
        if !stderr.is_empty() {
            lines.push("Stderr:".to_string());
            lines.push(truncate(stderr, cap));
        }
        let attempts: Vec<&str> = result
            .command_trace
            .iter()
            .filter(|entry| entry.stage.starts_with("attempt"))
            .map(|entry| entry.value.as_str())
            .collect();
        if attempts.len() > 1 {
            lines.push("Attempted commands:".to_string());
            lines.extend(attempts.iter().map(|cmd| format!("  {}", cmd)));
        }
    } else if !stdout.is_empty() {
        lines.push(truncate(stdout, cap));
    } else {
        lines.push(format!("Exit code: {}", result.exit_code));
    }

    lines.join("\n").trim().to_string()
}

/// Keep the first `cap` characters of `text`, marking the cut.
pub fn truncate(text: &str, cap: usize) -> String {
    match text.char_indices().nth(cap) {
        Some((idx, _)) => format!("{}{}", &text[..idx], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}
