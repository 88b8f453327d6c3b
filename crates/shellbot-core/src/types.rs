use serde::{Deserialize, Serialize};

/// Exit code used when no shell was ever invoked: the command was rejected,
/// timed out, or the engine failed internally.
pub const EXIT_REJECTED: i32 = -1;

/// Exit code of a synthesized policy failure (final command diverged from intent).
pub const EXIT_POLICY_FAILURE: i32 = -2;

/// Case-insensitive stderr substrings that mark an otherwise successful run as failed.
pub const FAILURE_MARKERS: &[&str] = &[
    "command not found",
    "permission denied",
    "no such file or directory",
    "unknown option",
    "unrecognized option",
    "invalid option",
    "cannot access",
    "not found",
    "failed",
    "error",
];

/// One step of the shell agent's work, kept for observability only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub stage: String,
    pub value: String,
}

impl TraceEntry {
    pub fn new(stage: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            value: value.into(),
        }
    }
}

/// Outcome of running (or refusing to run) one shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command_trace: Vec<TraceEntry>,
}

/// Why a result counts as a failure for retry and display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Non-zero exit, including the engine's negative sentinels.
    ExitCode(i32),
    /// Exit 0 but stderr carries one of [`FAILURE_MARKERS`].
    StderrMarker(&'static str),
    /// Exit 0 with nothing on either stream.
    SilentSuccess,
}

impl ExecutionResult {
    pub fn completed(
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            command_trace: Vec::new(),
        }
    }

    /// A result for a command that never reached a shell.
    pub fn rejected(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::completed(command, EXIT_REJECTED, "", reason)
    }

    pub fn policy_failure(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::completed(command, EXIT_POLICY_FAILURE, "", reason)
    }

    pub fn with_trace(mut self, trace: Vec<TraceEntry>) -> Self {
        self.command_trace = trace;
        self
    }

    pub fn is_policy_failure(&self) -> bool {
        self.exit_code == EXIT_POLICY_FAILURE
    }

    /// Classify the result. Exit code 1 is an ordinary non-zero code here, so it
    /// is always retryable even when a model emitted `exit 1` on purpose.
    pub fn failure(&self) -> Option<Failure> {
        if self.exit_code != 0 {
            return Some(Failure::ExitCode(self.exit_code));
        }

        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            let lowered = stderr.to_lowercase();
            if let Some(marker) = FAILURE_MARKERS.iter().find(|m| lowered.contains(*m)) {
                return Some(Failure::StderrMarker(marker));
            }
        }

        if stderr.is_empty() && self.stdout.trim().is_empty() {
            return Some(Failure::SilentSuccess);
        }

        None
    }

    pub fn has_error(&self) -> bool {
        self.failure().is_some()
    }
}

/// Schema definition for a tool's parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Output from a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
}
