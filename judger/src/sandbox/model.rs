use std::path::PathBuf;

use derive_builder::Builder;
use err_derive::Error;
use serde::{Deserialize, Serialize};

/// Why the sandbox terminated the process, as reported in its telemetry
/// record. `None` means a normal exit within all limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "REAL_TIME")]
    RealTime,
    #[serde(rename = "CPU_TIME")]
    CpuTime,
    #[serde(rename = "MEMORY")]
    Memory,
    #[serde(rename = "OUTPUT")]
    Output,
}

impl Default for ExitReason {
    fn default() -> Self {
        ExitReason::None
    }
}

/// Telemetry of one sandboxed process, parsed from the record the sandbox
/// writes to its result file descriptor. Times are in seconds, memory in
/// bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    #[serde(rename = "realtime")]
    pub real_time: f64,
    #[serde(rename = "cputime")]
    pub cpu_time: f64,
    pub memory: u64,
    #[serde(rename = "exitcode", default)]
    pub exit_code: i32,
    #[serde(rename = "exitsig", default)]
    pub exit_signal: i32,
    #[serde(rename = "termsig", default)]
    pub term_signal: i32,
    #[serde(rename = "exceeded", default)]
    pub exit_reason: ExitReason,
}

impl ExecuteResult {
    /// A clean run: no limit breached, zero exit code, no signals.
    pub fn is_clean(&self) -> bool {
        self.exit_reason == ExitReason::None
            && self.exit_code == 0
            && self.exit_signal == 0
            && self.term_signal == 0
    }
}

/// Where a standard stream of the sandboxed process should go.
#[derive(Debug, Clone, PartialEq)]
pub enum Redirect {
    /// Leave the stream alone (`/dev/null` semantics for the judged code).
    Ignore,
    /// Redirect to/from the given file.
    File(PathBuf),
}

impl Default for Redirect {
    fn default() -> Self {
        Redirect::Ignore
    }
}

/// One process to be run under the sandbox.
///
/// `time_limit` is the CPU budget in seconds *before* the language time
/// ratio is applied; the wall-clock ceiling is derived by the sandbox
/// implementation.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ExecTask {
    pub cmd: Vec<String>,
    pub time_limit: f64,
    /// In bytes.
    pub memory_limit: u64,
    #[builder(default = "1.0")]
    pub time_ratio: f64,
    /// When set, the process is chrooted, gets a remounted /dev, and runs
    /// under the syscall denylist.
    #[builder(default = "false")]
    pub restricted: bool,
    #[builder(default)]
    pub chroot: Option<PathBuf>,
    #[builder(default)]
    pub chdir: Option<PathBuf>,
    #[builder(default)]
    pub stdin: Redirect,
    #[builder(default)]
    pub stdout: Redirect,
    #[builder(default)]
    pub stderr: Redirect,
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(display = "failed to launch sandbox: {}", _0)]
    Launch(#[error(source, no_from)] std::io::Error),

    #[error(display = "failed to open redirect target {:?}: {}", _0, _1)]
    Redirect(PathBuf, #[error(source, no_from)] std::io::Error),

    #[error(display = "sandbox exited abnormally: {}", _0)]
    SandboxExit(std::process::ExitStatus),

    #[error(display = "unreadable telemetry record: {}", _0)]
    TelemetryIo(#[error(source, no_from)] std::io::Error),

    #[error(display = "malformed telemetry record: {}", _0)]
    TelemetryParse(#[error(source)] serde_yaml::Error),
}
