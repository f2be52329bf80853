use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::mirrorfs::SandboxRoot;
use crate::sandbox::{ExecTask, ExecuteResult, ExitReason, Redirect, Sandbox, SandboxError};

pub(crate) fn clean_result() -> ExecuteResult {
    ExecuteResult {
        real_time: 0.02,
        cpu_time: 0.01,
        memory: 1024,
        exit_code: 0,
        exit_signal: 0,
        term_signal: 0,
        exit_reason: ExitReason::None,
    }
}

type Effect = Box<dyn Fn(&ExecTask) + Send + Sync>;

struct Rule {
    pattern: String,
    result: ExecuteResult,
    stdout: Option<String>,
    stderr: Option<String>,
    effect: Option<Effect>,
}

/// A scriptable [`Sandbox`]: rules match on a substring of the command
/// vector, first match wins, and unmatched commands fail to "launch".
/// Every task that runs is recorded for later inspection.
pub(crate) struct MockSandbox {
    rules: Vec<Rule>,
    tasks: Mutex<Vec<ExecTask>>,
}

impl MockSandbox {
    pub fn new() -> MockSandbox {
        MockSandbox {
            rules: Vec::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn when(&mut self, pattern: &str) -> RuleBuilder<'_> {
        RuleBuilder {
            sandbox: self,
            rule: Rule {
                pattern: pattern.to_owned(),
                result: clean_result(),
                stdout: None,
                stderr: None,
                effect: None,
            },
        }
    }

    pub fn tasks(&self) -> Vec<ExecTask> {
        self.tasks.lock().unwrap().clone()
    }

    fn apply(&self, task: &ExecTask) -> Result<ExecuteResult, SandboxError> {
        self.tasks.lock().unwrap().push(task.clone());
        let joined = task.cmd.join(" ");
        let rule = self
            .rules
            .iter()
            .find(|rule| joined.contains(&rule.pattern))
            .ok_or_else(|| {
                SandboxError::Launch(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no mock rule for {:?}", task.cmd),
                ))
            })?;
        if let Some(effect) = &rule.effect {
            effect(task);
        }
        if let (Some(text), Redirect::File(path)) = (&rule.stdout, &task.stdout) {
            std::fs::write(path, text).unwrap();
        }
        if let (Some(text), Redirect::File(path)) = (&rule.stderr, &task.stderr) {
            std::fs::write(path, text).unwrap();
        }
        Ok(rule.result.clone())
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    async fn run(&self, task: &ExecTask) -> Result<ExecuteResult, SandboxError> {
        self.apply(task)
    }

    async fn run_interactive(
        &self,
        solution: &ExecTask,
        interactor: &ExecTask,
    ) -> Result<(ExecuteResult, ExecuteResult), SandboxError> {
        let solution_result = self.apply(solution)?;
        let interactor_result = self.apply(interactor)?;
        Ok((solution_result, interactor_result))
    }
}

pub(crate) struct RuleBuilder<'a> {
    sandbox: &'a mut MockSandbox,
    rule: Rule,
}

impl RuleBuilder<'_> {
    pub fn returns(mut self, exit_code: i32) -> Self {
        self.rule.result.exit_code = exit_code;
        self
    }

    pub fn signal(mut self, signal: i32) -> Self {
        self.rule.result.exit_signal = signal;
        self
    }

    pub fn reason(mut self, reason: ExitReason) -> Self {
        self.rule.result.exit_reason = reason;
        self
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.rule.stdout = Some(text.to_owned());
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.rule.stderr = Some(text.to_owned());
        self
    }

    pub fn effect(mut self, f: impl Fn(&ExecTask) + Send + Sync + 'static) -> Self {
        self.rule.effect = Some(Box::new(f));
        self
    }

    pub fn finish(self) {
        self.sandbox.rules.push(self.rule);
    }
}

/// A [`SandboxRoot`] that hands out plain directories, for tests that never
/// chroot for real.
pub(crate) struct NullRoot {
    base: PathBuf,
}

impl NullRoot {
    pub fn new(base: impl Into<PathBuf>) -> NullRoot {
        NullRoot { base: base.into() }
    }
}

#[async_trait]
impl SandboxRoot for NullRoot {
    async fn setup(&self, name: &str) -> io::Result<PathBuf> {
        let path = self.base.join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    async fn teardown(&self, _name: &str) -> io::Result<()> {
        Ok(())
    }
}
