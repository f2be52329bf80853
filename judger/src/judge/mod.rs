//! The concurrent judging engine and verdict aggregation.
//!
//! One judging run: load the problem, stage the submission into a fresh
//! working directory, compile it, assemble the sandbox root, then dispatch
//! one task per test case (in declared order) over a bounded pool of
//! concurrent workers. Workers send finished [`JudgeDetail`]s to a single
//! collector task that owns all mutable aggregate state; dependency gating
//! uses per-case completion signals instead of shared-map probing, so a
//! dependent case never observes a half-recorded dependency.

mod model;

use std::collections::HashMap;
use std::path::Path;

use dashmap::DashMap;
use err_derive::Error;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing_futures::Instrument;

use crate::checker::{self, Checker, UnknownBuiltin};
use crate::compile::{self, CompileError, CompileReport};
use crate::config::JudgerConfig;
use crate::mirrorfs::SandboxRoot;
use crate::problem::{self, ProblemConfig, ProblemError, SourceSpec, TestCase};
use crate::report::{Stage, StatusReporter};
use crate::sandbox::{ExecTaskBuilder, ExitReason, Redirect, Sandbox, SandboxError};
use crate::util::{random_name, read_first_bytes};

pub use model::{JudgeDetail, JudgeResult, Verdict};

/// Bytes of input/output/answer echoed into a judge detail.
const ECHO_LIMIT: usize = 128;

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error(display = "failed to load problem: {}", _0)]
    Problem(#[error(source)] ProblemError),

    #[error(display = "compilation could not be run: {}", _0)]
    Compile(#[error(source)] CompileError),

    #[error(display = "{}", _0)]
    Checker(#[error(source)] UnknownBuiltin),

    #[error(display = "sandbox root setup failed: {}", _0)]
    Root(#[error(source, no_from)] std::io::Error),

    #[error(display = "IO error while staging files: {}", _0)]
    Io(#[error(source)] std::io::Error),

    #[error(display = "result collector went away")]
    Collector,
}

/// Per-identifier verdict state shared between workers.
///
/// The `verdicts` map holds the latest verdict per input identifier (seeded
/// with [`Verdict::NotJudged`]); the watch channels carry the completion
/// signal dependents block on. Channels are created once, before any worker
/// starts, and every worker publishes exactly once.
pub(crate) struct VerdictBoard {
    verdicts: DashMap<String, Verdict>,
    senders: HashMap<String, watch::Sender<Verdict>>,
    receivers: HashMap<String, watch::Receiver<Verdict>>,
}

impl VerdictBoard {
    pub(crate) fn new<'a>(ids: impl Iterator<Item = &'a String>) -> VerdictBoard {
        let verdicts = DashMap::new();
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for id in ids {
            let (tx, rx) = watch::channel(Verdict::NotJudged);
            verdicts.insert(id.clone(), Verdict::NotJudged);
            senders.insert(id.clone(), tx);
            receivers.insert(id.clone(), rx);
        }
        VerdictBoard {
            verdicts,
            senders,
            receivers,
        }
    }

    pub(crate) fn publish(&self, id: &str, verdict: Verdict) {
        self.verdicts.insert(id.to_owned(), verdict);
        if let Some(tx) = self.senders.get(id) {
            let _ = tx.send(verdict);
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<Verdict> {
        self.verdicts.get(id).map(|v| *v)
    }

    /// Block until the case behind `id` has a final verdict. Unknown
    /// identifiers resolve to [`Verdict::NotJudged`], which no gate accepts.
    pub(crate) async fn wait_final(&self, id: &str) -> Verdict {
        let rx = match self.receivers.get(id) {
            Some(rx) => rx,
            None => return Verdict::NotJudged,
        };
        let mut rx = rx.clone();
        let verdict = match rx.wait_for(|v| *v != Verdict::NotJudged).await {
            Ok(v) => *v,
            Err(_) => Verdict::NotJudged,
        };
        verdict
    }
}

struct CaseContext<'a> {
    problem: &'a ProblemConfig,
    problem_dir: &'a Path,
    workdir: &'a Path,
    chroot: &'a Path,
    execute: &'a [String],
    time_ratio: f64,
    checker: &'a Checker,
    interactor: Option<&'a [String]>,
    sandbox: &'a dyn Sandbox,
    board: &'a VerdictBoard,
}

/// Judge one submission against one problem. The returned result covers
/// user-attributable outcomes (including `CE`); engine-fatal conditions
/// (malformed problem, sandbox root failure, unrunnable compiler) surface
/// as errors with no partial result.
pub async fn run(
    conf: &JudgerConfig,
    code: &SourceSpec,
    problem_dir: &Path,
    sandbox: &dyn Sandbox,
    root: &dyn SandboxRoot,
    reporter: &StatusReporter,
) -> Result<JudgeResult, JudgeError> {
    let problem = problem::load(problem_dir)?;
    let full_score: u32 = problem.cases.iter().map(|c| c.score).sum();

    let workdir = conf.tmp_dir.join(random_name());
    tokio::fs::create_dir_all(&workdir).await?;
    let _workdir_guard = scopeguard::guard(workdir.clone(), |dir| {
        if let Err(err) = std::fs::remove_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), %err, "failed to remove working directory");
        }
    });

    // The submission is judged from a private copy; the caller's record is
    // never touched.
    let mut code = code.clone();
    let staged = workdir.join(
        Path::new(&code.source)
            .file_name()
            .unwrap_or_else(|| "code".as_ref()),
    );
    tokio::fs::copy(&code.source, &staged).await?;
    code.source = staged.display().to_string();
    reporter.report(Stage::WorkDirReady, 0);

    for extra in &problem.extra_files {
        let target = workdir.join(extra);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(problem_dir.join(extra), target).await?;
    }
    reporter.report(Stage::FilesStaged, 0);

    let report = compile::compile(&mut code, conf, sandbox, &workdir).await?;
    let compile_entry = compile_detail(&report);
    if !report.success {
        return Ok(JudgeResult {
            success: true,
            verdict: Verdict::CompileError,
            exe_time: 0,
            exe_memory: 0,
            score: 0,
            full_score,
            detail: vec![compile_entry],
        });
    }
    reporter.report(Stage::Compiled, 0);

    let checker = Checker::from_spec(&problem.checker, problem_dir)?;
    let interactor = problem
        .interactor
        .as_ref()
        .map(|spec| checker::program_argv(spec, problem_dir));

    let root_name = random_name();
    let chroot = root.setup(&root_name).await.map_err(JudgeError::Root)?;

    let board = VerdictBoard::new(problem.cases.iter().map(|c| &c.input));
    let cx = CaseContext {
        problem: &problem,
        problem_dir,
        workdir: &workdir,
        chroot: &chroot,
        execute: &report.command.execute,
        time_ratio: report.language.execute.time_ratio,
        checker: &checker,
        interactor: interactor.as_deref(),
        sandbox,
        board: &board,
    };

    let outcome = judge_cases(conf, &cx, &problem.cases, reporter).await;

    // Teardown runs on every path once setup succeeded; failures are an
    // operator concern, not a run failure.
    if let Err(err) = root.teardown(&root_name).await {
        tracing::error!(%err, "sandbox root teardown failed");
    }

    let details = outcome?;
    Ok(finalize(&problem, details, &board, compile_entry))
}

async fn judge_cases(
    conf: &JudgerConfig,
    cx: &CaseContext<'_>,
    cases: &[TestCase],
    reporter: &StatusReporter,
) -> Result<HashMap<usize, JudgeDetail>, JudgeError> {
    let total = cases.len();
    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, JudgeDetail)>();

    let collector = tokio::spawn({
        let reporter = reporter.clone();
        async move {
            let mut results = HashMap::with_capacity(total);
            while let Some((id, detail)) = rx.recv().await {
                results.insert(id, detail);
                let judged = results.len();
                reporter.report(Stage::Judging, (100 * judged / total.max(1)) as u8);
                tracing::info!("{} / {} tests judged", judged, total);
            }
            results
        }
    });

    futures::stream::iter(cases.iter().enumerate())
        .map(|(id, case)| {
            let tx = tx.clone();
            async move {
                let detail = do_judge(id, case, cx).await;
                cx.board.publish(&case.input, detail.verdict);
                let _ = tx.send((id, detail));
            }
            .instrument(tracing::info_span!("case", test = id + 1))
        })
        .buffer_unordered(conf.max_workers.max(1))
        .collect::<()>()
        .await;
    drop(tx);

    collector.await.map_err(|_| JudgeError::Collector)
}

async fn do_judge(id: usize, case: &TestCase, cx: &CaseContext<'_>) -> JudgeDetail {
    tracing::info!(case = %case.input, "judging test {}", id + 1);
    let mut detail = JudgeDetail::new(format!("Test #{}", id + 1));

    for dep in &case.deps {
        let verdict = cx.board.wait_final(dep).await;
        if !verdict.is_accepted() {
            tracing::debug!(case = %case.input, %dep, %verdict, "dependency not satisfied");
            detail.verdict = Verdict::Ignored;
            detail.comment = format!("dependency {} not satisfied", dep);
            return detail;
        }
    }

    // Checkpoints are score-bearing milestones: once the gate passes they
    // are awarded their score without ever running the submission.
    if case.is_checkpoint() {
        detail.score = case.score;
        return detail;
    }

    let scratch = format!("case{}-{}", id, random_name());
    let input = cx.problem_dir.join(case.input_file());
    let answer = cx.problem_dir.join(&case.output);
    let output = cx.workdir.join(format!("{}.stdout", scratch));
    let time_limit = problem::effective_time_limit_ms(case, cx.problem) as f64 / 1000.0;
    let memory_limit = problem::effective_memory_limit_bytes(case, cx.problem);

    let (result, forced_wa) = if let Some(interactor) = cx.interactor {
        let solution_task = ExecTaskBuilder::default()
            .cmd(cx.execute.to_vec())
            .time_limit(time_limit)
            .memory_limit(memory_limit)
            .time_ratio(cx.time_ratio)
            .restricted(true)
            .chroot(Some(cx.chroot.to_owned()))
            .chdir(Some(cx.workdir.to_owned()))
            .build()
            .expect("solution task is fully specified");
        let mut interactor_cmd = interactor.to_vec();
        interactor_cmd.push(input.display().to_string());
        interactor_cmd.push(output.display().to_string());
        interactor_cmd.push(answer.display().to_string());
        let interactor_task = ExecTaskBuilder::default()
            .cmd(interactor_cmd)
            .time_limit(time_limit)
            .memory_limit(memory_limit)
            .build()
            .expect("interactor task is fully specified");

        match cx
            .sandbox
            .run_interactive(&solution_task, &interactor_task)
            .await
        {
            Ok((solution, interactor)) => {
                // The interactor failing while the solution stays within its
                // limits is attributed to the solution under judgment.
                let forced = solution.exit_reason == ExitReason::None && !interactor.is_clean();
                (solution, forced)
            }
            Err(err) => return system_error(detail, id, err),
        }
    } else {
        let task = ExecTaskBuilder::default()
            .cmd(cx.execute.to_vec())
            .time_limit(time_limit)
            .memory_limit(memory_limit)
            .time_ratio(cx.time_ratio)
            .restricted(true)
            .chroot(Some(cx.chroot.to_owned()))
            .chdir(Some(cx.workdir.to_owned()))
            .stdin(Redirect::File(input.clone()))
            .stdout(Redirect::File(output.clone()))
            .build()
            .expect("solution task is fully specified");
        match cx.sandbox.run(&task).await {
            Ok(result) => (result, false),
            Err(err) => return system_error(detail, id, err),
        }
    };

    detail.exe_time = (result.cpu_time * 1000.0) as u64;
    detail.exe_memory = result.memory;
    detail.exit_code = result.exit_code;
    detail.exit_signal = result.exit_signal;
    detail.input = read_first_bytes(&input, ECHO_LIMIT).await.unwrap_or_default();
    detail.output = read_first_bytes(&output, ECHO_LIMIT)
        .await
        .unwrap_or_default();
    detail.answer = read_first_bytes(&answer, ECHO_LIMIT)
        .await
        .unwrap_or_default();

    if forced_wa {
        detail.verdict = Verdict::WrongAnswer;
        return detail;
    }
    if result.exit_reason != ExitReason::None {
        detail.verdict = result.exit_reason.into();
        return detail;
    }
    if result.exit_code != 0 || result.exit_signal != 0 || result.term_signal != 0 {
        detail.verdict = Verdict::RuntimeError;
        return detail;
    }

    match cx
        .checker
        .check(
            cx.sandbox,
            &input,
            &output,
            &answer,
            cx.workdir,
            &scratch,
            memory_limit,
        )
        .await
    {
        Ok(outcome) => {
            detail.comment = outcome.comment;
            if outcome.matched {
                detail.score = case.score;
            } else {
                detail.verdict = Verdict::WrongAnswer;
            }
        }
        Err(err) => {
            tracing::error!(case = %case.input, %err, "checker failed");
            detail.verdict = Verdict::SystemError;
            detail.comment = format!("failed to run checker: {}", err);
        }
    }
    detail
}

fn system_error(mut detail: JudgeDetail, id: usize, err: SandboxError) -> JudgeDetail {
    tracing::error!(test = id + 1, %err, "failed to execute solution");
    detail.verdict = Verdict::SystemError;
    detail.comment = format!("failed to execute solution: {}", err);
    detail
}

/// Fold per-case details into the overall result, in declared order.
///
/// Dependencies are re-checked against the fully populated verdict map so a
/// case whose prerequisite ultimately failed is demoted to ignored no
/// matter what its own execution produced. The overall verdict is the first
/// non-accepted one in input order.
fn finalize(
    problem: &ProblemConfig,
    mut details: HashMap<usize, JudgeDetail>,
    board: &VerdictBoard,
    compile_entry: JudgeDetail,
) -> JudgeResult {
    let mut result = JudgeResult {
        success: true,
        verdict: Verdict::Accepted,
        exe_time: 0,
        exe_memory: 0,
        score: 0,
        full_score: problem.cases.iter().map(|c| c.score).sum(),
        detail: Vec::with_capacity(problem.cases.len() + 1),
    };

    for (id, case) in problem.cases.iter().enumerate() {
        let mut detail = match details.remove(&id) {
            Some(detail) => detail,
            None => continue,
        };
        let deps_ok = case
            .deps
            .iter()
            .all(|dep| board.get(dep).map_or(false, Verdict::is_accepted));
        if !deps_ok && detail.verdict != Verdict::Ignored {
            detail.verdict = Verdict::Ignored;
            detail.score = 0;
        }
        if detail.verdict != Verdict::Ignored {
            result.exe_time = result.exe_time.max(detail.exe_time);
            result.exe_memory = result.exe_memory.max(detail.exe_memory);
            result.score += detail.score;
        }
        if result.verdict.is_accepted() && !detail.verdict.is_accepted() {
            result.verdict = detail.verdict;
        }
        result.detail.push(detail);
    }

    result.detail.push(compile_entry);
    result
}

fn compile_detail(report: &CompileReport) -> JudgeDetail {
    let mut detail = JudgeDetail::new("compile".to_owned());
    detail.verdict = if report.success {
        Verdict::Accepted
    } else {
        Verdict::CompileError
    };
    detail.output = report.compiler_output.clone();
    detail.exe_time = (report.result.real_time * 1000.0) as u64;
    detail.exe_memory = report.result.memory;
    detail.exit_code = report.result.exit_code;
    detail.exit_signal = report.result.exit_signal;
    detail
}
