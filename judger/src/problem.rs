//! Problem packages and the test case model.
//!
//! A problem directory carries a declarative `problem.yaml`; when it is
//! absent the builder falls back to discovery mode and synthesizes cases by
//! pairing input files with matching output/answer files. Either way the
//! case list is then validated: identifiers must be unique, dependencies
//! must point at earlier cases, and a case without declared dependencies
//! implicitly depends on its immediate predecessor.

use std::path::Path;

use err_derive::Error;
use itertools::Itertools;
use serde::Deserialize;

use crate::sandbox::ExecuteResult;

pub const PROBLEM_FILE_NAME: &str = "problem.yaml";
/// Prefix marking a test case identifier as a checkpoint (scored, never
/// executed).
pub const CHECKPOINT_SENTINEL: char = '#';
/// Prefix selecting a builtin comparator as the checker.
pub const BUILTIN_CHECKER_SENTINEL: char = '!';

/// Hard ceiling on any time limit: two minutes.
pub const MAX_TIME_LIMIT_MS: u64 = 120_000;

const DISCOVERY_TIME_LIMIT_MS: u64 = 1_000;
const DISCOVERY_MEMORY_LIMIT_MIB: u64 = 256;
const DISCOVERY_CHECKER: &str = "!diff";

/// A program participating in judging: the submission, a checker or an
/// interactor. Either `source` + `language`, or a prebuilt `executable`
/// path relative to the problem directory. A checker source starting with
/// [`BUILTIN_CHECKER_SENTINEL`] names a builtin comparator instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceSpec {
    #[serde(default)]
    pub source: String,
    #[serde(rename = "lang", default)]
    pub language: String,
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(skip)]
    pub compile_result: Option<ExecuteResult>,
}

impl SourceSpec {
    pub fn builtin_checker(&self) -> Option<&str> {
        if self.source.starts_with(BUILTIN_CHECKER_SENTINEL) {
            Some(&self.source)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestCase {
    /// Input identifier; unique within the problem, doubles as the input
    /// file path unless this is a checkpoint.
    pub input: String,
    /// Expected-answer file path.
    #[serde(default)]
    pub output: String,
    #[serde(default = "default_score")]
    pub score: u32,
    /// Input identifiers of earlier cases this one depends on.
    #[serde(rename = "dep", default)]
    pub deps: Vec<String>,
    /// Per-case override, milliseconds.
    #[serde(rename = "time", default)]
    pub time_limit: Option<u64>,
    /// Per-case override, MiB.
    #[serde(rename = "memoryLimit", default)]
    pub memory_limit: Option<u64>,
}

fn default_score() -> u32 {
    1
}

impl TestCase {
    pub fn is_checkpoint(&self) -> bool {
        self.input.starts_with(CHECKPOINT_SENTINEL)
    }

    /// The on-disk input path: the identifier with the checkpoint sentinel
    /// stripped.
    pub fn input_file(&self) -> &str {
        self.input
            .strip_prefix(CHECKPOINT_SENTINEL)
            .unwrap_or(&self.input)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProblemConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// Milliseconds; clamped to [`MAX_TIME_LIMIT_MS`] on load.
    #[serde(rename = "timelimit")]
    pub time_limit: u64,
    /// MiB.
    #[serde(rename = "memorylimit")]
    pub memory_limit: u64,
    #[serde(default)]
    pub template: Option<String>,
    pub checker: SourceSpec,
    #[serde(default)]
    pub interactor: Option<SourceSpec>,
    /// Extra files staged into the working directory before compilation.
    #[serde(rename = "additionalLibrary", default)]
    pub extra_files: Vec<String>,
    #[serde(rename = "case")]
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Error)]
pub enum ProblemError {
    #[error(display = "cannot read problem directory: {}", _0)]
    Io(#[error(source)] std::io::Error),

    #[error(display = "malformed problem.yaml: {}", _0)]
    Parse(#[error(source)] serde_yaml::Error),

    #[error(display = "duplicate test case identifier `{}`", _0)]
    DuplicateCase(String),

    #[error(
        display = "case `{}` depends on `{}`, which is not an earlier case",
        _0,
        _1
    )]
    BadDependency(String, String),

    #[error(display = "problem contains no test cases")]
    NoCases,
}

/// Load a problem package, falling back to discovery mode when
/// `problem.yaml` is absent, then validate and normalize the case list.
pub fn load(problem_dir: &Path) -> Result<ProblemConfig, ProblemError> {
    let manifest = problem_dir.join(PROBLEM_FILE_NAME);
    let mut config = if manifest.exists() {
        let text = std::fs::read_to_string(&manifest)?;
        serde_yaml::from_str::<ProblemConfig>(&text)?
    } else {
        tracing::info!(dir = %problem_dir.display(), "no problem manifest, discovering test cases");
        discover(problem_dir)?
    };

    if config.cases.is_empty() {
        return Err(ProblemError::NoCases);
    }
    config.time_limit = config.time_limit.min(MAX_TIME_LIMIT_MS);
    normalize_dependencies(&mut config.cases)?;
    Ok(config)
}

/// Synthesize a problem from input/output file pairs: every `x.in` with a
/// matching `x.out` (or `x.ans`) becomes a case with score 1, in
/// lexicographic order of the basename. Unpaired files are skipped.
fn discover(problem_dir: &Path) -> Result<ProblemConfig, ProblemError> {
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for entry in std::fs::read_dir(problem_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(base) = name.strip_suffix(".in") {
            inputs.push(base.to_owned());
        } else if name.ends_with(".out") || name.ends_with(".ans") {
            outputs.push(name);
        }
    }

    let cases = inputs
        .into_iter()
        .sorted()
        .filter_map(|base| {
            let answer = [format!("{}.out", base), format!("{}.ans", base)]
                .into_iter()
                .find(|cand| outputs.contains(cand))?;
            Some(TestCase {
                input: format!("{}.in", base),
                output: answer,
                score: 1,
                deps: vec![],
                time_limit: None,
                memory_limit: None,
            })
        })
        .collect_vec();

    Ok(ProblemConfig {
        name: None,
        time_limit: DISCOVERY_TIME_LIMIT_MS,
        memory_limit: DISCOVERY_MEMORY_LIMIT_MIB,
        template: None,
        checker: SourceSpec {
            source: DISCOVERY_CHECKER.to_owned(),
            ..Default::default()
        },
        interactor: None,
        extra_files: vec![],
        cases,
    })
}

/// Enforce identifier uniqueness and backwards-only dependencies, and give
/// every non-first case without declared dependencies an implicit
/// dependency on its predecessor.
fn normalize_dependencies(cases: &mut [TestCase]) -> Result<(), ProblemError> {
    let mut known: Vec<String> = Vec::with_capacity(cases.len());
    for i in 0..cases.len() {
        if cases[i].deps.is_empty() && i > 0 {
            let previous = cases[i - 1].input.clone();
            cases[i].deps = vec![previous];
        }
        for dep in &cases[i].deps {
            if !known.iter().any(|k| k == dep) {
                return Err(ProblemError::BadDependency(
                    cases[i].input.clone(),
                    dep.clone(),
                ));
            }
        }
        if known.iter().any(|k| k == &cases[i].input) {
            return Err(ProblemError::DuplicateCase(cases[i].input.clone()));
        }
        known.push(cases[i].input.clone());
    }
    Ok(())
}

/// Effective per-case time limit, honoring the per-case override and the
/// global ceiling.
pub fn effective_time_limit_ms(case: &TestCase, problem: &ProblemConfig) -> u64 {
    case.time_limit
        .unwrap_or(problem.time_limit)
        .min(MAX_TIME_LIMIT_MS)
}

/// Effective per-case memory limit in bytes.
pub fn effective_memory_limit_bytes(case: &TestCase, problem: &ProblemConfig) -> u64 {
    case.memory_limit.unwrap_or(problem.memory_limit) * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn case(input: &str, deps: &[&str]) -> TestCase {
        TestCase {
            input: input.to_owned(),
            output: format!("{}.out", input),
            score: 1,
            deps: deps.iter().map(|d| d.to_string()).collect(),
            time_limit: None,
            memory_limit: None,
        }
    }

    #[test]
    fn implicit_chaining_fills_previous_case() {
        let mut cases = vec![case("1.in", &[]), case("2.in", &[]), case("3.in", &["1.in"])];
        normalize_dependencies(&mut cases).unwrap();
        assert_eq!(cases[0].deps, Vec::<String>::new());
        assert_eq!(cases[1].deps, vec!["1.in".to_owned()]);
        assert_eq!(cases[2].deps, vec!["1.in".to_owned()]);
    }

    #[test]
    fn forward_dependency_is_rejected() {
        let mut cases = vec![case("1.in", &["2.in"]), case("2.in", &[])];
        assert!(matches!(
            normalize_dependencies(&mut cases),
            Err(ProblemError::BadDependency(c, d)) if c == "1.in" && d == "2.in"
        ));
    }

    #[test]
    fn self_dependency_is_rejected() {
        let mut cases = vec![case("1.in", &["1.in"])];
        assert!(matches!(
            normalize_dependencies(&mut cases),
            Err(ProblemError::BadDependency(_, _))
        ));
    }

    #[test]
    fn duplicate_identifier_is_rejected() {
        let mut cases = vec![case("1.in", &[]), case("1.in", &[])];
        assert!(matches!(
            normalize_dependencies(&mut cases),
            Err(ProblemError::DuplicateCase(c)) if c == "1.in"
        ));
    }

    #[test]
    fn checkpoint_sentinel_is_detected_and_stripped() {
        let cp = case("#stage1", &[]);
        assert!(cp.is_checkpoint());
        assert_eq!(cp.input_file(), "stage1");
        let plain = case("1.in", &[]);
        assert!(!plain.is_checkpoint());
        assert_eq!(plain.input_file(), "1.in");
    }

    #[test]
    fn discovery_pairs_inputs_with_outputs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.in", "a.out", "b.in", "b.ans", "c.in", "notes.txt"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let problem = load(dir.path()).unwrap();
        assert_eq!(problem.cases.len(), 2);
        assert_eq!(problem.cases[0].input, "a.in");
        assert_eq!(problem.cases[0].output, "a.out");
        assert_eq!(problem.cases[0].score, 1);
        assert_eq!(problem.cases[1].input, "b.in");
        assert_eq!(problem.cases[1].output, "b.ans");
        // Discovery still applies implicit chaining.
        assert_eq!(problem.cases[1].deps, vec!["a.in".to_owned()]);
        assert_eq!(problem.checker.builtin_checker(), Some("!diff"));
    }

    #[test]
    fn discovery_with_no_pairs_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("c.in"), "x").unwrap();
        assert!(matches!(load(dir.path()), Err(ProblemError::NoCases)));
    }

    #[test]
    fn manifest_roundtrip_and_clamp() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROBLEM_FILE_NAME),
            r##"
timelimit: 500000
memorylimit: 512
checker:
  source: "chk.cpp"
  lang: "cpp"
case:
  - input: "1.in"
    output: "1.out"
    score: 30
  - input: "#milestone"
    score: 70
    dep: ["1.in"]
"##,
        )
        .unwrap();
        let problem = load(dir.path()).unwrap();
        assert_eq!(problem.time_limit, MAX_TIME_LIMIT_MS);
        assert_eq!(problem.memory_limit, 512);
        assert_eq!(problem.cases.len(), 2);
        assert_eq!(problem.cases[1].score, 70);
        assert!(problem.cases[1].is_checkpoint());
        assert!(problem.checker.builtin_checker().is_none());
    }

    #[test]
    fn per_case_overrides_take_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROBLEM_FILE_NAME),
            r#"
timelimit: 1000
memorylimit: 64
checker:
  source: "!diff"
case:
  - input: "1.in"
    output: "1.out"
  - input: "2.in"
    output: "2.out"
    time: 2000
    memoryLimit: 128
"#,
        )
        .unwrap();
        let problem = load(dir.path()).unwrap();
        assert_eq!(effective_time_limit_ms(&problem.cases[0], &problem), 1000);
        assert_eq!(effective_time_limit_ms(&problem.cases[1], &problem), 2000);
        assert_eq!(
            effective_memory_limit_bytes(&problem.cases[1], &problem),
            128 * 1024 * 1024
        );
    }
}
