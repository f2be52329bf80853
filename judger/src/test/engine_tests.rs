//! Scenario tests for [`crate::judge::run`]: full judging sessions against
//! the mock sandbox, from problem loading to the aggregated result.

use std::path::PathBuf;

use pretty_assertions::assert_eq;
use test_env_log::test;

use super::util::{MockSandbox, NullRoot};
use crate::config::JudgerConfig;
use crate::judge::{self, JudgeResult, Verdict};
use crate::problem::SourceSpec;
use crate::report::StatusReporter;
use crate::sandbox::{ExitReason, Redirect};

const MOCK_LANG: &str = r#"
meta:
  name: mock
source: "main.mock"
executable: "main.exe"
compile:
  args: ["mockc", "{source}", "-o", "{executable}"]
  timelimit: 10
execute:
  cmd: ["{executable}"]
  timeratio: 1
"#;

struct Fixture {
    // Owns every path handed out below.
    _dir: tempfile::TempDir,
    conf: JudgerConfig,
    code: SourceSpec,
    problem_dir: PathBuf,
    root_dir: PathBuf,
}

fn fixture(problem_yaml: &str, files: &[(&str, &str)]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path();

    let lang_dir = base.join("languages");
    std::fs::create_dir_all(&lang_dir).unwrap();
    std::fs::write(lang_dir.join("mock.yaml"), MOCK_LANG).unwrap();

    let problem_dir = base.join("problem");
    std::fs::create_dir_all(&problem_dir).unwrap();
    if !problem_yaml.is_empty() {
        std::fs::write(problem_dir.join("problem.yaml"), problem_yaml).unwrap();
    }
    for (name, content) in files {
        std::fs::write(problem_dir.join(name), content).unwrap();
    }

    let source = base.join("submission.mock");
    std::fs::write(&source, "solution text").unwrap();

    let tmp_dir = base.join("tmp");
    std::fs::create_dir_all(&tmp_dir).unwrap();
    let root_dir = base.join("roots");

    let conf = JudgerConfig {
        tmp_dir,
        language_dir: lang_dir,
        max_workers: 4,
        ..Default::default()
    };
    let code = SourceSpec {
        source: source.display().to_string(),
        language: "mock".to_owned(),
        ..Default::default()
    };
    Fixture {
        _dir: dir,
        conf,
        code,
        problem_dir,
        root_dir,
    }
}

fn compile_ok(sandbox: &mut MockSandbox) {
    sandbox
        .when("mockc")
        .effect(|task| {
            let pos = task.cmd.iter().position(|a| a == "-o").unwrap();
            std::fs::write(&task.cmd[pos + 1], "").unwrap();
        })
        .finish();
}

async fn run(fx: &Fixture, sandbox: &MockSandbox) -> JudgeResult {
    let root = NullRoot::new(&fx.root_dir);
    judge::run(
        &fx.conf,
        &fx.code,
        &fx.problem_dir,
        sandbox,
        &root,
        &StatusReporter::noop(),
    )
    .await
    .expect("judging session failed")
}

const TWO_CASES: &str = r#"
timelimit: 1000
memorylimit: 64
checker:
  source: "!diff"
case:
  - input: "1.in"
    output: "1.out"
    score: 30
  - input: "2.in"
    output: "2.out"
    score: 70
"#;

#[test(tokio::test)]
async fn accepted_run_sums_scores() {
    let fx = fixture(
        TWO_CASES,
        &[("1.in", "a"), ("1.out", "42"), ("2.in", "b"), ("2.out", "42")],
    );
    let mut sandbox = MockSandbox::new();
    compile_ok(&mut sandbox);
    sandbox.when("main.exe").stdout("42\n").finish();

    let result = run(&fx, &sandbox).await;
    assert_eq!(result.verdict, Verdict::Accepted);
    assert_eq!(result.score, 100);
    assert_eq!(result.full_score, 100);
    assert_eq!(result.detail.len(), 3);
    assert_eq!(result.detail[0].verdict, Verdict::Accepted);
    assert_eq!(result.detail[1].verdict, Verdict::Accepted);
    // Trailing compile entry is present even on success.
    assert_eq!(result.detail[2].name, "compile");
    assert_eq!(result.detail[2].verdict, Verdict::Accepted);
    assert_eq!(result.detail[0].answer, "42");
}

#[test(tokio::test)]
async fn failed_dependency_ignores_dependents() {
    // Case 1 produces a wrong answer; case 2 implicitly depends on it and
    // must be ignored without contributing score, as must the checkpoint.
    let fx = fixture(
        r##"
timelimit: 1000
memorylimit: 64
checker:
  source: "!diff"
case:
  - input: "1.in"
    output: "1.out"
    score: 10
  - input: "2.in"
    output: "2.out"
    score: 20
  - input: "#milestone"
    score: 70
    dep: ["2.in"]
"##,
        &[("1.in", "a"), ("1.out", "expected"), ("2.in", "b"), ("2.out", "42")],
    );
    let mut sandbox = MockSandbox::new();
    compile_ok(&mut sandbox);
    sandbox.when("main.exe").stdout("42\n").finish();

    let result = run(&fx, &sandbox).await;
    assert_eq!(result.detail[0].verdict, Verdict::WrongAnswer);
    assert_eq!(result.detail[1].verdict, Verdict::Ignored);
    assert_eq!(result.detail[1].score, 0);
    assert_eq!(result.detail[2].verdict, Verdict::Ignored);
    assert_eq!(result.verdict, Verdict::WrongAnswer);
    assert_eq!(result.score, 0);
    assert_eq!(result.full_score, 100);
}

#[test(tokio::test)]
async fn checkpoint_scores_without_execution() {
    let fx = fixture(
        r##"
timelimit: 1000
memorylimit: 64
checker:
  source: "!diff"
case:
  - input: "1.in"
    output: "1.out"
    score: 10
  - input: "#milestone"
    score: 90
"##,
        &[("1.in", "a"), ("1.out", "42")],
    );
    let mut sandbox = MockSandbox::new();
    compile_ok(&mut sandbox);
    sandbox.when("main.exe").stdout("42\n").finish();

    let result = run(&fx, &sandbox).await;
    assert_eq!(result.verdict, Verdict::Accepted);
    assert_eq!(result.detail[1].verdict, Verdict::Accepted);
    assert_eq!(result.detail[1].score, 90);
    assert_eq!(result.score, 100);
    // There is no rule for a `#milestone` invocation: reaching the score
    // proves the checkpoint never touched the sandbox.
    let executions = sandbox
        .tasks()
        .iter()
        .filter(|t| t.cmd.join(" ").contains("main.exe") && !t.cmd[0].contains("mockc"))
        .count();
    assert_eq!(executions, 1);
}

#[test(tokio::test)]
async fn compile_failure_short_circuits() {
    let fx = fixture(TWO_CASES, &[("1.in", "a"), ("1.out", "42"), ("2.in", "b"), ("2.out", "42")]);
    let mut sandbox = MockSandbox::new();
    sandbox
        .when("mockc")
        .returns(1)
        .stderr("main.mock:1: error: expected ';'")
        .finish();

    let result = run(&fx, &sandbox).await;
    assert_eq!(result.verdict, Verdict::CompileError);
    assert_eq!(result.score, 0);
    assert_eq!(result.detail.len(), 1);
    assert_eq!(result.detail[0].name, "compile");
    assert_eq!(result.detail[0].verdict, Verdict::CompileError);
    assert!(result.detail[0].output.contains("expected ';'"));
}

#[test(tokio::test)]
async fn missing_artifact_is_a_compile_error() {
    let fx = fixture(TWO_CASES, &[("1.in", "a"), ("1.out", "42"), ("2.in", "b"), ("2.out", "42")]);
    let mut sandbox = MockSandbox::new();
    // Compiler "succeeds" but produces nothing.
    sandbox.when("mockc").finish();

    let result = run(&fx, &sandbox).await;
    assert_eq!(result.verdict, Verdict::CompileError);
}

#[test(tokio::test)]
async fn abnormal_exits_classify_per_case() {
    let fx = fixture(
        r#"
timelimit: 1000
memorylimit: 64
checker:
  source: "!diff"
case:
  - input: "1.in"
    output: "1.out"
"#,
        &[("1.in", "a"), ("1.out", "42")],
    );

    // Nonzero exit code: runtime error.
    let mut sandbox = MockSandbox::new();
    compile_ok(&mut sandbox);
    sandbox.when("main.exe").returns(9).finish();
    let result = run(&fx, &sandbox).await;
    assert_eq!(result.verdict, Verdict::RuntimeError);
    assert_eq!(result.detail[0].exit_code, 9);

    // Sandbox-reported limit breach passes through as the verdict.
    let mut sandbox = MockSandbox::new();
    compile_ok(&mut sandbox);
    sandbox
        .when("main.exe")
        .reason(ExitReason::CpuTime)
        .finish();
    let result = run(&fx, &sandbox).await;
    assert_eq!(result.verdict, Verdict::TimeLimitExceeded);

    // Fatal signal: runtime error.
    let mut sandbox = MockSandbox::new();
    compile_ok(&mut sandbox);
    sandbox.when("main.exe").signal(11).finish();
    let result = run(&fx, &sandbox).await;
    assert_eq!(result.verdict, Verdict::RuntimeError);
}

#[test(tokio::test)]
async fn launch_failure_is_contained_as_system_error() {
    let fx = fixture(TWO_CASES, &[("1.in", "a"), ("1.out", "42"), ("2.in", "b"), ("2.out", "42")]);
    let mut sandbox = MockSandbox::new();
    compile_ok(&mut sandbox);
    // No execution rule: every solution launch fails.

    let result = run(&fx, &sandbox).await;
    assert_eq!(result.detail[0].verdict, Verdict::SystemError);
    // The sibling case is not aborted, only gated on its dependency.
    assert_eq!(result.detail[1].verdict, Verdict::Ignored);
    assert_eq!(result.verdict, Verdict::SystemError);
}

#[test(tokio::test)]
async fn interactor_failure_is_attributed_to_the_solution() {
    let interactive = r#"
timelimit: 1000
memorylimit: 64
checker:
  source: "!diff"
interactor:
  source: "inter.cpp"
  executable: "inter.exe"
case:
  - input: "1.in"
    output: "1.out"
    score: 100
"#;
    let fx = fixture(interactive, &[("1.in", "a"), ("1.out", "42")]);
    let mut sandbox = MockSandbox::new();
    compile_ok(&mut sandbox);
    sandbox.when("main.exe").finish();
    sandbox
        .when("inter.exe")
        .returns(1)
        .effect(|task| {
            // The interactor owns the transcript file given as its second
            // to last argument; write a "correct" one to prove the forced
            // wrong-answer wins over the checker.
            let out = &task.cmd[task.cmd.len() - 2];
            std::fs::write(out, "42\n").unwrap();
        })
        .finish();

    let result = run(&fx, &sandbox).await;
    assert_eq!(result.verdict, Verdict::WrongAnswer);
    assert_eq!(result.score, 0);

    // Same protocol with a clean interactor is accepted.
    let mut sandbox = MockSandbox::new();
    compile_ok(&mut sandbox);
    sandbox.when("main.exe").finish();
    sandbox
        .when("inter.exe")
        .effect(|task| {
            let out = &task.cmd[task.cmd.len() - 2];
            std::fs::write(out, "42\n").unwrap();
        })
        .finish();
    let result = run(&fx, &sandbox).await;
    assert_eq!(result.verdict, Verdict::Accepted);
    assert_eq!(result.score, 100);
}

#[test(tokio::test)]
async fn external_checker_decides_and_comments() {
    let with_checker = r#"
timelimit: 1000
memorylimit: 64
checker:
  source: "chk.cpp"
  executable: "chk"
case:
  - input: "1.in"
    output: "1.out"
    score: 100
"#;
    let fx = fixture(with_checker, &[("1.in", "a"), ("1.out", "whatever")]);
    let mut sandbox = MockSandbox::new();
    compile_ok(&mut sandbox);
    sandbox.when("main.exe").stdout("3 1 2\n").finish();
    sandbox.when("chk").stdout("ok: valid permutation").finish();

    let result = run(&fx, &sandbox).await;
    assert_eq!(result.verdict, Verdict::Accepted);
    assert_eq!(result.detail[0].comment, "ok: valid permutation");

    // The solution ran restricted, the checker did not.
    let tasks = sandbox.tasks();
    let solution = tasks
        .iter()
        .find(|t| t.cmd[0].contains("main.exe"))
        .unwrap();
    assert!(solution.restricted);
    assert!(solution.chroot.is_some());
    assert!(matches!(solution.stdin, Redirect::File(_)));
    let checker = tasks.iter().find(|t| t.cmd[0].contains("chk")).unwrap();
    assert!(!checker.restricted);
    assert_eq!(checker.time_limit, 10.0);

    // A rejecting checker turns the same run into a wrong answer.
    let mut sandbox = MockSandbox::new();
    compile_ok(&mut sandbox);
    sandbox.when("main.exe").stdout("3 1 2\n").finish();
    sandbox.when("chk").returns(1).stderr("not a permutation").finish();
    let result = run(&fx, &sandbox).await;
    assert_eq!(result.verdict, Verdict::WrongAnswer);
    assert_eq!(result.detail[0].comment, "not a permutation");
}

#[test(tokio::test)]
async fn single_worker_runs_are_idempotent() {
    let fx = {
        let mut fx = fixture(
            TWO_CASES,
            &[("1.in", "a"), ("1.out", "42"), ("2.in", "b"), ("2.out", "nope")],
        );
        fx.conf.max_workers = 1;
        fx
    };

    let make_sandbox = || {
        let mut sandbox = MockSandbox::new();
        compile_ok(&mut sandbox);
        sandbox.when("main.exe").stdout("42\n").finish();
        sandbox
    };

    let first = run(&fx, &make_sandbox()).await;
    let second = run(&fx, &make_sandbox()).await;
    assert_eq!(first.verdict, second.verdict);
    assert_eq!(first.score, second.score);
    assert_eq!(first.detail, second.detail);
}

#[test(tokio::test)]
async fn discovered_problems_are_judged() {
    // No problem.yaml at all: cases come from discovery, scored 1 each.
    let fx = fixture(
        "",
        &[
            ("a.in", "x"),
            ("a.out", "42"),
            ("b.in", "y"),
            ("b.ans", "42"),
            ("c.in", "unpaired"),
        ],
    );
    let mut sandbox = MockSandbox::new();
    compile_ok(&mut sandbox);
    sandbox.when("main.exe").stdout("42\n").finish();

    let result = run(&fx, &sandbox).await;
    assert_eq!(result.verdict, Verdict::Accepted);
    assert_eq!(result.full_score, 2);
    assert_eq!(result.score, 2);
    assert_eq!(result.detail.len(), 3);
}
