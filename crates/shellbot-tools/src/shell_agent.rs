use crate::format::format_execution;
use crate::orchestrator::ShellTaskRunner;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use shellbot_core::error::BotError;
use shellbot_core::tool_registry::Tool;
use std::sync::Arc;

/// Turn a natural-language instruction into safe shell commands and run them.
pub struct ShellAgentTool {
    runner: Arc<ShellTaskRunner>,
    output_cap: usize,
}

impl ShellAgentTool {
    pub fn new(runner: Arc<ShellTaskRunner>, output_cap: usize) -> Self {
        Self { runner, output_cap }
    }
}

#[async_trait]
impl Tool for ShellAgentTool {
    fn name(&self) -> &str {
        "shell_agent"
    }

    fn description(&self) -> &str {
        "Translate an instruction into an allow-listed Linux command, run it with a timeout \
         and retry with refined commands when it fails"
    }

    fn triggers(&self) -> &[&str] {
        &["cmd:", "shell", "linux", "agent"]
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "instruction": {
                    "type": "string",
                    "description": "What to do, in plain words or as a literal command"
                }
            },
            "required": ["instruction"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, BotError> {
        #[derive(Deserialize)]
        struct Args {
            instruction: String,
        }
        let args: Args = serde_json::from_value(args).map_err(|e| BotError::ToolExecution {
            tool_name: "shell_agent".into(),
            message: format!("Invalid arguments: {}", e),
        })?;

        let result = self.runner.run_shell_task(&args.instruction).await;
        Ok(format_execution(&result, self.output_cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DEFAULT_OUTPUT_CAP;
    use crate::testing::{ScriptedRunner, ScriptedTranslator};

    fn tool(translator: Vec<Option<&'static str>>, runner: ScriptedRunner) -> ShellAgentTool {
        let runner = ShellTaskRunner::new(Arc::new(ScriptedTranslator::new(translator)), Arc::new(runner));
        ShellAgentTool::new(Arc::new(runner), DEFAULT_OUTPUT_CAP)
    }

    #[tokio::test]
    async fn test_renders_final_result() {
        let tool = tool(
            vec![Some("df -h")],
            ScriptedRunner::new(vec![("df -h", 0, "/dev/sda1 40G", "")]),
        );
        let text = tool.execute(json!({"instruction": "disk space"})).await.unwrap();
        assert_eq!(text, "$ df -h\n/dev/sda1 40G");
    }

    #[tokio::test]
    async fn test_rejection_is_plain_text() {
        let tool = tool(vec![Some("scarycmd")], ScriptedRunner::new(vec![]));
        let text = tool.execute(json!({"instruction": "be scary"})).await.unwrap();
        assert!(text.starts_with("Exit code: -1"));
        assert!(text.contains("exact safe command"));
    }

    #[tokio::test]
    async fn test_missing_instruction() {
        let tool = tool(vec![], ScriptedRunner::new(vec![]));
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Invalid arguments"));
    }
}
