// dbrestore/src/utils/testing.rs
//! Test doubles for the command runner and interactive prompts.
use std::cell::RefCell;
use std::collections::VecDeque;

use crate::errors::{RestoreError, Result};
use crate::utils::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::utils::prompt::Prompt;

type Matcher = Box<dyn Fn(&CommandSpec) -> bool>;

struct Rule {
    matcher: Matcher,
    output: CommandOutput,
    once: bool,
}

/// Answers tool invocations from an ordered rule list and records every call.
/// Unmatched calls succeed with empty output.
#[derive(Default)]
pub struct FakeRunner {
    rules: RefCell<Vec<Rule>>,
    calls: RefCell<Vec<CommandSpec>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, matcher: impl Fn(&CommandSpec) -> bool + 'static, output: CommandOutput) -> Self {
        self.push(Box::new(matcher), output, false)
    }

    pub fn once(self, matcher: impl Fn(&CommandSpec) -> bool + 'static, output: CommandOutput) -> Self {
        self.push(Box::new(matcher), output, true)
    }

    fn push(self, matcher: Matcher, output: CommandOutput, once: bool) -> Self {
        self.rules.borrow_mut().push(Rule { matcher, output, once });
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&CommandSpec) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(spec.clone());
        let mut rules = self.rules.borrow_mut();
        let Some(index) = rules.iter().position(|r| (r.matcher)(spec)) else {
            return Ok(CommandOutput::default());
        };
        let output = rules[index].output.clone();
        if rules[index].once {
            rules.remove(index);
        }
        Ok(output)
    }
}

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn exit(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

pub fn program(name: &'static str) -> impl Fn(&CommandSpec) -> bool {
    move |spec| spec.program == name
}

/// Matches a psql `-c` query whose SQL contains `needle`.
pub fn sql_contains(needle: &'static str) -> impl Fn(&CommandSpec) -> bool {
    move |spec| {
        spec.program == "psql"
            && spec
                .args
                .windows(2)
                .any(|w| w[0] == "-c" && w[1].contains(needle))
    }
}

/// Matches a psql run of a script file (`-f`).
pub fn psql_file() -> impl Fn(&CommandSpec) -> bool {
    |spec| spec.program == "psql" && spec.has_arg("-f")
}

/// Prompt that replays canned answers in order and fails when it runs out.
#[derive(Default)]
pub struct ScriptedPrompt {
    selections: VecDeque<usize>,
    inputs: VecDeque<String>,
    confirms: VecDeque<bool>,
    pub asked: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, index: usize) -> Self {
        self.selections.push_back(index);
        self
    }

    pub fn input(mut self, value: &str) -> Self {
        self.inputs.push_back(value.to_string());
        self
    }

    pub fn confirm(mut self, value: bool) -> Self {
        self.confirms.push_back(value);
        self
    }
}

impl Prompt for ScriptedPrompt {
    fn select(&mut self, title: &str, _items: &[String]) -> Result<usize> {
        self.asked.push(title.to_string());
        self.selections
            .pop_front()
            .ok_or_else(|| RestoreError::Cancelled(format!("no scripted selection for '{}'", title)))
    }

    fn input(&mut self, message: &str, default: Option<&str>) -> Result<String> {
        self.asked.push(message.to_string());
        match self.inputs.pop_front() {
            Some(v) => Ok(v),
            None => default
                .map(str::to_string)
                .ok_or_else(|| RestoreError::Cancelled(format!("no scripted input for '{}'", message))),
        }
    }

    fn confirm(&mut self, message: &str, _default: bool) -> Result<bool> {
        self.asked.push(message.to_string());
        self.confirms
            .pop_front()
            .ok_or_else(|| RestoreError::Cancelled(format!("no scripted confirmation for '{}'", message)))
    }
}
