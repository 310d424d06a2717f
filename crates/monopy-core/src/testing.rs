//! Recording command runner for unit tests.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;

use crate::effects::{CommandRunner, Invocation};
use crate::process::RunOutput;

type Hook = Box<dyn Fn(&Invocation) + Send + Sync>;

/// Records every invocation and answers from scripted responses.
///
/// Responses and hooks match when their pattern is a substring of the
/// invocation's display form; the first registered match wins. Unscripted
/// `--version` calls report Poetry 2.1.1 and uv 0.7.2.
#[derive(Default)]
pub(crate) struct FakeRunner {
    calls: Mutex<Vec<Invocation>>,
    responses: Vec<(String, RunOutput)>,
    hooks: Vec<(String, Hook)>,
    missing: HashSet<String>,
}

impl FakeRunner {
    pub(crate) fn respond(mut self, pattern: &str, code: i32, stdout: &str, stderr: &str) -> Self {
        self.responses.push((
            pattern.to_string(),
            RunOutput {
                code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        ));
        self
    }

    pub(crate) fn on(mut self, pattern: &str, hook: impl Fn(&Invocation) + Send + Sync + 'static) -> Self {
        self.hooks.push((pattern.to_string(), Box::new(hook)));
        self
    }

    pub(crate) fn without_program(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Display form of every call, `--version` probes excluded.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(Invocation::display)
            .filter(|command| !command.ends_with("--version"))
            .collect()
    }

    pub(crate) fn cwds(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter(|call| call.args != ["--version"])
            .map(|call| call.cwd)
            .collect()
    }

    fn answer(&self, invocation: &Invocation) -> RunOutput {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }
        let display = invocation.display();
        for (pattern, hook) in &self.hooks {
            if display.contains(pattern.as_str()) {
                hook(invocation);
            }
        }
        if let Some((_, output)) = self
            .responses
            .iter()
            .find(|(pattern, _)| display.contains(pattern.as_str()))
        {
            return output.clone();
        }
        if invocation.args == ["--version"] {
            let stdout = if display.starts_with("uv") {
                "uv 0.7.2\n"
            } else {
                "Poetry (version 2.1.1)\n"
            };
            return RunOutput {
                code: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            };
        }
        RunOutput::default()
    }
}

impl CommandRunner for FakeRunner {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        (!self.missing.contains(program)).then(|| PathBuf::from("/usr/bin").join(program))
    }

    fn run(&self, invocation: &Invocation) -> Result<RunOutput> {
        Ok(self.answer(invocation))
    }

    fn run_streaming(&self, invocation: &Invocation) -> Result<RunOutput> {
        Ok(self.answer(invocation))
    }

    fn run_passthrough(&self, invocation: &Invocation) -> Result<RunOutput> {
        Ok(self.answer(invocation))
    }
}
