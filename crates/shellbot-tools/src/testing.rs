//! Deterministic collaborators shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use shellbot_core::types::ExecutionResult;

use crate::cheat::UsageLookup;
use crate::executor::CommandRunner;
use crate::sanitizer::{sanitize, ShellCommand};
use crate::translator::{CommandTranslator, Translation, TranslationError, TranslationSource};

/// Answers translations from a queue; `None` entries (and an empty queue)
/// mean the model declined.
pub(crate) struct ScriptedTranslator {
    replies: Mutex<VecDeque<Option<&'static str>>>,
    pub(crate) seen: Mutex<Vec<String>>,
}

impl ScriptedTranslator {
    pub(crate) fn new(replies: Vec<Option<&'static str>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandTranslator for ScriptedTranslator {
    async fn translate(&self, instruction: &str) -> Result<Translation, TranslationError> {
        self.seen.lock().unwrap().push(instruction.to_string());
        let reply = self.replies.lock().unwrap().pop_front().flatten();
        let raw = reply.ok_or(TranslationError::ModelDeclined)?;
        Ok(Translation {
            command: sanitize(raw)?,
            source: TranslationSource::Model,
        })
    }
}

/// Returns canned results per command text; unknown commands succeed with
/// `ok <command>` on stdout.
pub(crate) struct ScriptedRunner {
    results: HashMap<String, (i32, String, String)>,
    pub(crate) ran: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub(crate) fn new(results: Vec<(&str, i32, &str, &str)>) -> Self {
        Self {
            results: results
                .into_iter()
                .map(|(cmd, code, out, err)| (cmd.to_string(), (code, out.to_string(), err.to_string())))
                .collect(),
            ran: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn ran(&self) -> Vec<String> {
        self.ran.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &ShellCommand) -> ExecutionResult {
        self.ran.lock().unwrap().push(command.to_string());
        match self.results.get(command.as_str()) {
            Some((code, out, err)) => ExecutionResult::completed(command.as_str(), *code, out, err),
            None => ExecutionResult::completed(command.as_str(), 0, format!("ok {}", command), ""),
        }
    }
}

/// Usage lookup with a fixed answer that records what it was asked for.
pub(crate) struct StaticUsage {
    answer: Option<&'static str>,
    pub(crate) asked: Mutex<Vec<String>>,
}

impl StaticUsage {
    pub(crate) fn new(answer: Option<&'static str>) -> Self {
        Self {
            answer,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageLookup for StaticUsage {
    async fn fetch_usage(&self, binary: &str) -> Option<String> {
        self.asked.lock().unwrap().push(binary.to_string());
        self.answer.map(str::to_string)
    }
}
