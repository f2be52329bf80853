//! Output checking: builtin comparators and external checker programs.
//!
//! A checker decides whether the submission's output answers a test case,
//! given `(input, actual-output, expected-answer)` paths. Builtin
//! comparators are registered under names carrying the `!` sentinel and run
//! in-process; external checkers are problem-provided executables run under
//! the sandbox (unrestricted) with a fixed CPU budget.

use std::collections::HashMap;
use std::path::Path;

use difference::{Changeset, Difference};
use err_derive::Error;
use once_cell::sync::Lazy;

use crate::problem::SourceSpec;
use crate::sandbox::{ExecTaskBuilder, Redirect, Sandbox, SandboxError};
use crate::util::read_first_bytes;

/// CPU budget for external checkers, seconds.
const CHECKER_TIME_LIMIT: f64 = 10.0;
/// Bytes of checker output kept as the case comment.
const COMMENT_LIMIT: usize = 128;

pub type CompareFn = fn(output: &str, answer: &str) -> CompareOutcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareOutcome {
    pub matched: bool,
    pub comment: String,
}

/// Builtin comparators, keyed by their sentinel-prefixed name.
pub static BUILTIN_CHECKERS: Lazy<HashMap<&'static str, CompareFn>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, CompareFn> = HashMap::new();
    m.insert("!diff", compare_diff);
    m
});

/// Whitespace-insensitive comparison: per-line, runs of blanks collapse,
/// trailing blanks and trailing empty lines are ignored.
fn compare_diff(output: &str, answer: &str) -> CompareOutcome {
    fn normalize(text: &str) -> Vec<String> {
        let mut lines: Vec<String> = text
            .lines()
            .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect();
        while lines.last().map_or(false, |l| l.is_empty()) {
            lines.pop();
        }
        lines
    }

    if normalize(output) == normalize(answer) {
        CompareOutcome {
            matched: true,
            comment: String::new(),
        }
    } else {
        let mut comment = diff(output, answer);
        comment.truncate(COMMENT_LIMIT);
        CompareOutcome {
            matched: false,
            comment,
        }
    }
}

/// Line diff of two strings, `-` for surplus output and `+` for missing
/// answer lines.
pub fn diff(got: &str, expected: &str) -> String {
    let Changeset { diffs, .. } = Changeset::new(got, expected, "\n");

    fn make_diff_line(ln_diff: &Difference) -> String {
        match ln_diff {
            Difference::Same(ln) => "  ".to_owned() + ln,
            Difference::Rem(ln) => "- ".to_owned() + ln,
            Difference::Add(ln) => "+ ".to_owned() + ln,
        }
    }

    diffs
        .iter()
        .map(make_diff_line)
        .collect::<Vec<String>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(display = "cannot read compared files: {}", _0)]
    Io(#[error(source)] std::io::Error),

    #[error(display = "failed to run checker: {}", _0)]
    Sandbox(#[error(source)] SandboxError),
}

/// Resolve the argv of a problem-provided program (checker or interactor):
/// the prebuilt executable if declared, otherwise the conventional
/// `<source>.exe` artifact next to it.
pub fn program_argv(spec: &SourceSpec, problem_dir: &Path) -> Vec<String> {
    let exe = match &spec.executable {
        Some(exe) if !exe.is_empty() => problem_dir.join(exe),
        _ => problem_dir.join(format!("{}.exe", spec.source)),
    };
    vec![exe.display().to_string()]
}

pub enum Checker {
    Builtin(&'static str, CompareFn),
    External(Vec<String>),
}

#[derive(Debug, Error)]
#[error(display = "unknown builtin checker `{}`", _0)]
pub struct UnknownBuiltin(pub String);

impl Checker {
    pub fn from_spec(spec: &SourceSpec, problem_dir: &Path) -> Result<Checker, UnknownBuiltin> {
        match spec.builtin_checker() {
            Some(name) => match BUILTIN_CHECKERS.get_key_value(name) {
                Some((&name, &f)) => Ok(Checker::Builtin(name, f)),
                None => Err(UnknownBuiltin(name.to_owned())),
            },
            None => Ok(Checker::External(program_argv(spec, problem_dir))),
        }
    }

    /// Compare `output` against `answer` for the given `input`.
    ///
    /// `scratch` names per-case temporary files inside `workdir`;
    /// `memory_limit` (bytes) bounds external checkers.
    pub async fn check(
        &self,
        sandbox: &dyn Sandbox,
        input: &Path,
        output: &Path,
        answer: &Path,
        workdir: &Path,
        scratch: &str,
        memory_limit: u64,
    ) -> Result<CompareOutcome, CheckError> {
        match self {
            Checker::Builtin(_, compare) => {
                let got = tokio::fs::read_to_string(output).await?;
                let expected = tokio::fs::read_to_string(answer).await?;
                Ok(compare(&got, &expected))
            }
            Checker::External(argv) => {
                let comment_path = workdir.join(format!("{}.checker", scratch));
                let mut cmd = argv.clone();
                cmd.push(input.display().to_string());
                cmd.push(output.display().to_string());
                cmd.push(answer.display().to_string());
                let task = ExecTaskBuilder::default()
                    .cmd(cmd)
                    .time_limit(CHECKER_TIME_LIMIT)
                    .memory_limit(memory_limit)
                    .stdout(Redirect::File(comment_path.clone()))
                    .stderr(Redirect::File(comment_path.clone()))
                    .build()
                    .expect("checker task is fully specified");
                let result = sandbox.run(&task).await?;
                let comment = read_first_bytes(&comment_path, COMMENT_LIMIT)
                    .await
                    .unwrap_or_default();
                Ok(CompareOutcome {
                    matched: result.exit_code == 0,
                    comment,
                })
            }
        }
    }
}
