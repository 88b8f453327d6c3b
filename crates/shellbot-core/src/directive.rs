//! Explicit tool requests typed by the user, either as an inline JSON payload
//! (`{"name": "cheat", "parameters": {"command": "tar"}}`) or as
//! `run tool <name> <argument text>`.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::BotError;
use crate::tool_registry::ToolRegistry;

/// A decoded tool request, resolved to the tool's canonical name.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub tool_name: String,
    pub parameters: Value,
}

fn directive_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)^\s*(?:run|use)\s+tool\s+(\S+)(?:\s+(.*))?$").ok())
        .as_ref()
}

/// Decode a tool request from raw user text.
///
/// Returns `Ok(None)` when the text is not a directive at all, and a
/// [`BotError::Directive`] with user-facing wording when it is one that cannot
/// be honoured.
pub fn parse_directive(text: &str, registry: &ToolRegistry) -> Result<Option<Directive>, BotError> {
    if let Some(directive) = parse_json_payload(text, registry)? {
        return Ok(Some(directive));
    }

    let Some(caps) = directive_regex().and_then(|re| re.captures(text)) else {
        return Ok(None);
    };
    let identifier = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let remaining = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();

    let tool = registry
        .resolve(identifier)
        .ok_or_else(|| BotError::Directive(format!("Unknown tool '{}'.", identifier)))?;

    let schema = tool.parameters_schema();
    let names: Vec<String> = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default();

    let parameters = match names.as_slice() {
        [] => Value::Object(Map::new()),
        [only] => {
            if remaining.is_empty() {
                return Err(BotError::Directive(
                    "Provide the arguments needed for this tool call.".into(),
                ));
            }
            let mut map = Map::new();
            map.insert(only.clone(), Value::String(remaining.to_string()));
            Value::Object(map)
        }
        _ => {
            return Err(BotError::Directive(
                "Tool requires structured JSON parameters.".into(),
            ))
        }
    };

    Ok(Some(Directive {
        tool_name: tool.name().to_string(),
        parameters,
    }))
}

fn parse_json_payload(text: &str, registry: &ToolRegistry) -> Result<Option<Directive>, BotError> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Ok(None);
    };
    if end <= start {
        return Ok(None);
    }
    let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(&text[start..=end]) else {
        return Ok(None);
    };

    let Some(name) = payload.get("name").and_then(Value::as_str) else {
        return Ok(None);
    };
    let parameters = match payload.get("parameters") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(_) => return Ok(None),
    };

    let tool = registry
        .resolve(name)
        .ok_or_else(|| BotError::Directive(format!("Unknown tool '{}'.", name)))?;

    Ok(Some(Directive {
        tool_name: tool.name().to_string(),
        parameters,
    }))
}
