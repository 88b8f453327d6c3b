use crate::sanitizer::{sanitize, ShellCommand};

/// Recognize input that is already a literal safe command, so no model call is
/// needed. Multi-line input is never direct: it usually carries context such
/// as "Previous command: ...".
pub fn detect_direct(instruction: &str) -> Option<ShellCommand> {
    let text = instruction.trim();
    if text.is_empty() || text.contains('\n') {
        return None;
    }

    if let Ok(command) = sanitize(text) {
        return Some(command);
    }

    let stripped = text
        .strip_prefix('`')
        .and_then(|t| t.strip_suffix('`'))
        .or_else(|| text.strip_prefix('"').and_then(|t| t.strip_suffix('"')))?;
    sanitize(stripped).ok()
}
