//! The shell agent's retry loop.
//!
//! One call turns an instruction into at most `max_attempts` executed
//! commands. Attempts are strictly sequential: each refinement prompt is built
//! from the previous attempt's exact exit code and stderr.

use std::sync::Arc;

use shellbot_core::config::ShellAgentConfig;
use shellbot_core::types::{ExecutionResult, Failure, TraceEntry};
use tracing::{debug, info};

use crate::allowlist;
use crate::cheat::UsageLookup;
use crate::executor::CommandRunner;
use crate::format::truncate;
use crate::sanitizer::ShellCommand;
use crate::translator::{CommandTranslator, TranslationError, TranslationSource};

/// Characters of usage reference passed along with the escalation prompt.
const USAGE_HINT_CAP: usize = 3_000;

pub struct ShellTaskRunner {
    translator: Arc<dyn CommandTranslator>,
    runner: Arc<dyn CommandRunner>,
    usage: Option<Arc<dyn UsageLookup>>,
    max_attempts: usize,
    compliance_check: bool,
}

impl ShellTaskRunner {
    pub fn new(translator: Arc<dyn CommandTranslator>, runner: Arc<dyn CommandRunner>) -> Self {
        let defaults = ShellAgentConfig::default();
        Self {
            translator,
            runner,
            usage: None,
            max_attempts: defaults.max_attempts,
            compliance_check: defaults.compliance_check,
        }
    }

    pub fn with_config(self, config: &ShellAgentConfig) -> Self {
        self.with_max_attempts(config.max_attempts)
            .with_compliance_check(config.compliance_check)
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_compliance_check(mut self, enabled: bool) -> Self {
        self.compliance_check = enabled;
        self
    }

    pub fn with_usage_lookup(mut self, usage: Arc<dyn UsageLookup>) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Translate, execute and retry until a run succeeds, the translator runs
    /// out of new ideas, or `max_attempts` commands have been executed. The
    /// returned result carries the trace of everything tried.
    pub async fn run_shell_task(&self, instruction: &str) -> ExecutionResult {
        let instruction = instruction.trim();
        let mut trace = vec![TraceEntry::new("instruction", instruction)];

        let mut command = match self.translator.translate(instruction).await {
            Ok(translation) => {
                trace.push(source_entry("translation", &translation.source, &translation.command));
                translation.command
            }
            Err(e) => {
                info!("No command for instruction {:?}: {}", instruction, e);
                trace.push(TraceEntry::new("translation_error", e.to_string()));
                return ExecutionResult::rejected("", denial_message(&e)).with_trace(trace);
            }
        };

        let mut attempt = 1;
        let mut escalated = false;
        let result = loop {
            trace.push(TraceEntry::new(format!("attempt {}", attempt), command.as_str()));
            let result = self.runner.run(&command).await;

            let Some(failure) = result.failure() else {
                info!("Attempt {} succeeded: {}", attempt, command);
                break result;
            };
            trace.push(TraceEntry::new(format!("failure {}", attempt), describe(&failure, &result)));

            if attempt >= self.max_attempts {
                info!("Giving up after {} attempts: {}", attempt, command);
                break result;
            }

            let refinement = refinement_instruction(instruction, &command, &result, &failure);
            let next = match self.next_command(&refinement, &command, &mut trace).await {
                Some(next) => Some(next),
                None if !escalated => {
                    escalated = true;
                    self.escalate(instruction, &refinement, &command, &mut trace).await
                }
                None => None,
            };

            match next {
                Some(next) => {
                    info!("Attempt {} failed ({}); retrying with: {}", attempt, describe(&failure, &result), next);
                    command = next;
                    attempt += 1;
                }
                None => break result,
            }
        };

        let result = if self.compliance_check && attempt > 1 && !result.has_error() {
            self.check_compliance(instruction, result, &mut trace).await
        } else {
            result
        };

        result.with_trace(trace)
    }

    /// Ask for a refined command. `None` when the translator has nothing new.
    async fn next_command(
        &self,
        prompt: &str,
        previous: &ShellCommand,
        trace: &mut Vec<TraceEntry>,
    ) -> Option<ShellCommand> {
        match self.translator.translate(prompt).await {
            Ok(translation) if translation.command.as_str() == previous.as_str() => {
                debug!("Translator repeated the failed command: {}", previous);
                trace.push(TraceEntry::new("refinement_repeated", previous.as_str()));
                None
            }
            Ok(translation) => {
                trace.push(source_entry("refinement", &translation.source, &translation.command));
                Some(translation.command)
            }
            Err(e) => {
                debug!("Refinement produced no command: {}", e);
                trace.push(TraceEntry::new("refinement_error", e.to_string()));
                None
            }
        }
    }

    /// Last resort: feed a usage reference for the relevant binary into one
    /// more translation.
    async fn escalate(
        &self,
        instruction: &str,
        refinement: &str,
        failed: &ShellCommand,
        trace: &mut Vec<TraceEntry>,
    ) -> Option<ShellCommand> {
        let usage = self.usage.as_ref()?;
        let binary = escalation_binary(instruction, failed);
        let Some(reference) = usage.fetch_usage(binary).await else {
            trace.push(TraceEntry::new("cheat_sheet_unavailable", binary));
            return None;
        };
        info!("Escalating with usage reference for {}", binary);
        trace.push(TraceEntry::new("cheat_sheet", binary));

        let prompt = format!(
            "{}\nUsage reference for {}:\n{}",
            refinement,
            binary,
            truncate(&reference, USAGE_HINT_CAP)
        );
        self.next_command(&prompt, failed, trace).await
    }

    /// Re-translate the original instruction and refuse a result whose command
    /// drifted from it.
    async fn check_compliance(
        &self,
        instruction: &str,
        result: ExecutionResult,
        trace: &mut Vec<TraceEntry>,
    ) -> ExecutionResult {
        let expected = match self.translator.translate(instruction).await {
            Ok(translation) => translation.command,
            Err(e) => {
                trace.push(TraceEntry::new("compliance_skipped", e.to_string()));
                return result;
            }
        };
        trace.push(TraceEntry::new("compliance_expected", expected.as_str()));

        if normalize(expected.as_str()) == normalize(&result.command) {
            return result;
        }
        info!(
            "Final command {:?} diverged from fresh translation {:?}",
            result.command,
            expected.as_str()
        );
        ExecutionResult::policy_failure(
            result.command.clone(),
            format!(
                "The command that finally succeeded (`{}`) does not match the requested task \
                 (expected `{}`). Its output was withheld.",
                result.command, expected
            ),
        )
    }
}

fn source_entry(stage: &str, source: &TranslationSource, command: &ShellCommand) -> TraceEntry {
    let stage = match source {
        TranslationSource::Direct => format!("{}_direct", stage),
        TranslationSource::Model => stage.to_string(),
        TranslationSource::QuoteRepaired => format!("{}_quote_repaired", stage),
        TranslationSource::Narrowed { discarded } => {
            format!("{}_narrowed (dropped {:?})", stage, discarded)
        }
    };
    TraceEntry::new(stage, command.as_str())
}

fn describe(failure: &Failure, result: &ExecutionResult) -> String {
    match failure {
        Failure::ExitCode(code) => format!("exit code {}", code),
        Failure::StderrMarker(marker) => format!("stderr mentions {:?}", marker),
        Failure::SilentSuccess if result.exit_code == 0 => "no output".to_string(),
        Failure::SilentSuccess => format!("exit code {}", result.exit_code),
    }
}

/// The multi-line prompt describing a failed attempt. Being multi-line, it is
/// never mistaken for a direct command.
fn refinement_instruction(
    instruction: &str,
    command: &ShellCommand,
    result: &ExecutionResult,
    failure: &Failure,
) -> String {
    let details = match failure {
        Failure::SilentSuccess => {
            "It exited 0 but printed nothing, so it did not answer the task.".to_string()
        }
        _ => {
            let stderr = result.stderr.trim();
            format!(
                "Exit code: {}\nError output: {}",
                result.exit_code,
                if stderr.is_empty() { "(none)" } else { stderr }
            )
        }
    };
    format!(
        "Previous command: {}\nThat command failed.\n{}\nOriginal task: {}\n\
         Suggest a different single command that accomplishes the original task.",
        command,
        truncate(&details, USAGE_HINT_CAP),
        instruction
    )
}

/// First token of the instruction when it names an allowed program, otherwise
/// the failed command's program.
fn escalation_binary<'a>(instruction: &'a str, failed: &'a ShellCommand) -> &'a str {
    instruction
        .split_whitespace()
        .next()
        .filter(|token| allowlist::is_allowed(token))
        .unwrap_or_else(|| failed.primary_binary())
}

fn normalize(command: &str) -> String {
    command
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// User-facing text for an instruction that produced no runnable command.
fn denial_message(error: &TranslationError) -> String {
    match error {
        TranslationError::Rejected(rejection) => format!(
            "I can't run that safely ({}). Please send the exact safe command you want to run.",
            rejection
        ),
        TranslationError::Backend(_) => format!(
            "The command translator is unavailable ({}). Please send the literal command instead.",
            error
        ),
        _ => format!(
            "I couldn't work out a safe command for that ({}). Please be more specific or send the literal command.",
            error
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedRunner, ScriptedTranslator, StaticUsage};

    fn runner_with(
        translator: &Arc<ScriptedTranslator>,
        runner: &Arc<ScriptedRunner>,
    ) -> ShellTaskRunner {
        ShellTaskRunner::new(translator.clone(), runner.clone())
    }

    #[tokio::test]
    async fn test_retries_until_fourth_attempt_succeeds() {
        let translator = Arc::new(ScriptedTranslator::new(vec![
            Some("ls /srv/a"),
            Some("ls /srv/b"),
            Some("ls /srv/c"),
            Some("ls /srv/d"),
        ]));
        let runner = Arc::new(ScriptedRunner::new(vec![
            ("ls /srv/a", 2, "", "ls: /srv/a: error A"),
            ("ls /srv/b", 2, "", "ls: /srv/b: error B"),
            ("ls /srv/c", 2, "", "ls: /srv/c: error C"),
            ("ls /srv/d", 0, "report.txt", ""),
        ]));

        let result = runner_with(&translator, &runner)
            .run_shell_task("find the report under /srv")
            .await;

        assert_eq!(runner.ran(), ["ls /srv/a", "ls /srv/b", "ls /srv/c", "ls /srv/d"]);
        assert_eq!(result.stdout, "report.txt");
        assert_eq!(result.exit_code, 0);

        let seen = translator.seen();
        assert_eq!(seen[0], "find the report under /srv");
        assert!(seen[1].contains("Previous command: ls /srv/a"));
        assert!(seen[1].contains("error A"));
        assert!(seen[2].contains("error B"));
        assert!(seen[3].contains("error C"));
        assert!(seen[3].contains("Original task: find the report under /srv"));

        let attempts: Vec<&str> = result
            .command_trace
            .iter()
            .filter(|e| e.stage.starts_with("attempt"))
            .map(|e| e.value.as_str())
            .collect();
        assert_eq!(attempts, ["ls /srv/a", "ls /srv/b", "ls /srv/c", "ls /srv/d"]);
    }

    #[tokio::test]
    async fn test_silent_success_triggers_retry() {
        let translator = Arc::new(ScriptedTranslator::new(vec![Some("ls x"), Some("ls -la x")]));
        let runner = Arc::new(ScriptedRunner::new(vec![
            ("ls x", 0, "", ""),
            ("ls -la x", 0, "total 0", ""),
        ]));

        let result = runner_with(&translator, &runner).run_shell_task("show x").await;

        assert_eq!(runner.ran(), ["ls x", "ls -la x"]);
        assert_eq!(result.stdout, "total 0");
        assert!(translator.seen()[1].contains("printed nothing"));
    }

    #[tokio::test]
    async fn test_no_refinement_after_last_attempt() {
        let translator = Arc::new(ScriptedTranslator::new(vec![
            Some("ls a"),
            Some("ls b"),
            Some("ls c"),
            Some("ls d"),
        ]));
        let runner = Arc::new(ScriptedRunner::new(vec![
            ("ls a", 1, "", ""),
            ("ls b", 1, "", ""),
            ("ls c", 1, "", ""),
            ("ls d", 1, "", ""),
        ]));

        let result = runner_with(&translator, &runner)
            .with_max_attempts(3)
            .run_shell_task("list something")
            .await;

        assert_eq!(runner.ran(), ["ls a", "ls b", "ls c"]);
        assert_eq!(translator.seen().len(), 3);
        assert_eq!(result.command, "ls c");
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_repeated_command_stops_without_lookup() {
        let translator = Arc::new(ScriptedTranslator::new(vec![Some("ls q"), Some("ls q")]));
        let runner = Arc::new(ScriptedRunner::new(vec![("ls q", 2, "", "ls: q: not found")]));

        let result = runner_with(&translator, &runner).run_shell_task("list q").await;

        assert_eq!(runner.ran(), ["ls q"]);
        assert_eq!(result.exit_code, 2);
        assert!(result
            .command_trace
            .iter()
            .any(|e| e.stage == "refinement_repeated"));
    }

    #[tokio::test]
    async fn test_cheat_sheet_escalation_uses_instruction_binary() {
        let translator = Arc::new(ScriptedTranslator::new(vec![
            Some("tar -xf a.tgz"),
            Some("tar -xf a.tgz"),
            Some("tar -xzf a.tgz"),
        ]));
        let runner = Arc::new(ScriptedRunner::new(vec![
            ("tar -xf a.tgz", 2, "", "tar: error is not recoverable"),
            ("tar -xzf a.tgz", 0, "a/\na/file", ""),
        ]));
        let usage = Arc::new(StaticUsage::new(Some("tar -xzf archive.tgz  # extract gzip")));

        let result = runner_with(&translator, &runner)
            .with_usage_lookup(usage.clone())
            .run_shell_task("tar extract a.tgz")
            .await;

        assert_eq!(usage.asked(), ["tar"]);
        assert_eq!(runner.ran(), ["tar -xf a.tgz", "tar -xzf a.tgz"]);
        assert_eq!(result.stdout, "a/\na/file");
        let seen = translator.seen();
        assert!(seen[2].contains("Usage reference for tar:"));
        assert!(seen[2].contains("extract gzip"));
    }

    #[tokio::test]
    async fn test_escalation_falls_back_to_failed_binary() {
        let translator = Arc::new(ScriptedTranslator::new(vec![Some("jq . data.json"), None, None]));
        let runner = Arc::new(ScriptedRunner::new(vec![(
            "jq . data.json",
            2,
            "",
            "jq: error: Could not open data.json",
        )]));
        let usage = Arc::new(StaticUsage::new(Some("jq '.' file.json")));

        let result = runner_with(&translator, &runner)
            .with_usage_lookup(usage.clone())
            .run_shell_task("pretty print the data file")
            .await;

        assert_eq!(usage.asked(), ["jq"]);
        assert_eq!(runner.ran(), ["jq . data.json"]);
        assert_eq!(translator.seen().len(), 3);
        assert_eq!(result.exit_code, 2);
    }

    #[tokio::test]
    async fn test_escalation_happens_once() {
        let translator = Arc::new(ScriptedTranslator::new(vec![
            Some("ls a"),
            None,
            Some("ls b"),
            None,
            Some("ls c"),
        ]));
        let runner = Arc::new(ScriptedRunner::new(vec![
            ("ls a", 2, "", "missing"),
            ("ls b", 2, "", "missing"),
        ]));
        let usage = Arc::new(StaticUsage::new(Some("ls -la")));

        let result = runner_with(&translator, &runner)
            .with_usage_lookup(usage.clone())
            .run_shell_task("ls the thing")
            .await;

        assert_eq!(usage.asked().len(), 1);
        assert_eq!(runner.ran(), ["ls a", "ls b"]);
        assert_eq!(result.command, "ls b");
    }

    #[tokio::test]
    async fn test_translation_failure_never_executes() {
        let translator = Arc::new(ScriptedTranslator::new(vec![Some("scarycmd --all")]));
        let runner = Arc::new(ScriptedRunner::new(vec![]));

        let result = runner_with(&translator, &runner).run_shell_task("be scary").await;

        assert!(runner.ran().is_empty());
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("unknown binary"));
        assert!(result.stderr.contains("exact safe command"));
    }

    #[tokio::test]
    async fn test_declined_translation_asks_for_specifics() {
        let translator = Arc::new(ScriptedTranslator::new(vec![None]));
        let runner = Arc::new(ScriptedRunner::new(vec![]));

        let result = runner_with(&translator, &runner).run_shell_task("do the thing").await;

        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("more specific"));
    }

    #[tokio::test]
    async fn test_compliance_mismatch_is_policy_failure() {
        let translator = Arc::new(ScriptedTranslator::new(vec![
            Some("ls logs"),
            Some("cat /etc/hostname"),
            Some("ls logs"),
        ]));
        let runner = Arc::new(ScriptedRunner::new(vec![("ls logs", 2, "", "No such file or directory")]));

        let result = runner_with(&translator, &runner)
            .with_compliance_check(true)
            .run_shell_task("list logs")
            .await;

        assert_eq!(result.exit_code, -2);
        assert!(result.is_policy_failure());
        assert_eq!(result.command, "cat /etc/hostname");
        assert!(result.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_compliance_match_ignores_spacing() {
        let translator = Arc::new(ScriptedTranslator::new(vec![
            Some("ls x"),
            Some("ls -la x"),
            Some("ls  -la   x"),
        ]));
        let runner = Arc::new(ScriptedRunner::new(vec![("ls x", 2, "", "boom")]));

        let result = runner_with(&translator, &runner)
            .with_compliance_check(true)
            .run_shell_task("show x")
            .await;

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.command, "ls -la x");
    }

    #[tokio::test]
    async fn test_compliance_off_by_default() {
        let translator = Arc::new(ScriptedTranslator::new(vec![Some("ls x"), Some("ls y")]));
        let runner = Arc::new(ScriptedRunner::new(vec![("ls x", 2, "", "boom")]));

        let result = runner_with(&translator, &runner).run_shell_task("show x").await;

        assert_eq!(result.exit_code, 0);
        assert_eq!(translator.seen().len(), 2);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  LS   -la\tx "), "ls -la x");
    }
}
