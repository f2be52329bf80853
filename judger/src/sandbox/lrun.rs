//! Sandbox backend shelling out to the external `lrun` binary.
//!
//! `lrun` enforces the resource limits, drops networking and (when asked)
//! chroots and filters syscalls, then writes a YAML telemetry record to the
//! file descriptor given with `--result-fd`. We hand it an open file as
//! fd 3 and parse the record after the child exits.

use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::process::Command;

use super::model::{ExecTask, ExecuteResult, Redirect, SandboxError};
use super::Sandbox;
use crate::util::random_name;

/// The fd number the sandbox writes its telemetry record to.
const RESULT_FD: i32 = 3;
/// Fixed stack ceiling for every sandboxed process: 1 GiB.
const STACK_LIMIT_BYTES: u64 = 1 << 30;
/// Wall-clock ceiling relative to the CPU budget.
const WALL_CLOCK_FACTOR: f64 = 1.5;
/// Denylist applied to restricted (untrusted) processes: tracing, explicit
/// sync/flush, namespace manipulation, clone with CLONE_NEWNS, and kernel
/// introspection.
const SYSCALL_DENYLIST: &str = "!execve,flock,ptrace,sync,fdatasync,fsync,msync,sync_file_range,\
syncfs,unshare,setns,clone[a&268435456==268435456],query_module,sysinfo,syslog,sysfs";

static RESULT_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct LrunSandbox {
    binary: PathBuf,
    scratch_dir: PathBuf,
}

impl LrunSandbox {
    pub fn new(binary: impl Into<PathBuf>) -> LrunSandbox {
        LrunSandbox {
            binary: binary.into(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    fn build_args(&self, task: &ExecTask) -> Vec<String> {
        let cpu_limit = task.time_limit * task.time_ratio;
        let wall_limit = cpu_limit * WALL_CLOCK_FACTOR;
        let mut args = vec![
            "--max-real-time".to_owned(),
            format!("{:.3}", wall_limit),
            "--max-cpu-time".to_owned(),
            format!("{:.3}", cpu_limit),
            "--max-stack".to_owned(),
            STACK_LIMIT_BYTES.to_string(),
            "--max-memory".to_owned(),
            task.memory_limit.to_string(),
            "--network".to_owned(),
            "false".to_owned(),
            "--result-fd".to_owned(),
            RESULT_FD.to_string(),
        ];
        if task.restricted {
            if let Some(chroot) = &task.chroot {
                args.push("--chroot".to_owned());
                args.push(chroot.display().to_string());
                args.push("--remount-dev".to_owned());
                args.push("true".to_owned());
            }
            if let Some(chdir) = &task.chdir {
                args.push("--chdir".to_owned());
                args.push(chdir.display().to_string());
            }
            args.push("--syscalls".to_owned());
            args.push(SYSCALL_DENYLIST.to_owned());
        }
        args.push("--".to_owned());
        args.extend(task.cmd.iter().cloned());
        args
    }

    fn command_for(&self, task: &ExecTask) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.build_args(task));
        cmd.kill_on_drop(true);
        cmd
    }

    /// Create the file that will back the child's result fd. The child gets
    /// it dup2-ed onto fd 3 right before exec.
    fn result_file(&self) -> Result<(std::fs::File, PathBuf), SandboxError> {
        let path = self.scratch_dir.join(format!(
            "lrun-result-{}-{}",
            random_name(),
            RESULT_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(SandboxError::Launch)?;
        Ok((file, path))
    }
}

fn open_output(path: &Path) -> Result<std::fs::File, SandboxError> {
    std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| SandboxError::Redirect(path.to_owned(), e))
}

fn apply_redirects(cmd: &mut Command, task: &ExecTask) -> Result<(), SandboxError> {
    match &task.stdin {
        Redirect::Ignore => {
            cmd.stdin(Stdio::null());
        }
        Redirect::File(path) => {
            let file = std::fs::File::open(path)
                .map_err(|e| SandboxError::Redirect(path.clone(), e))?;
            cmd.stdin(Stdio::from(file));
        }
    }

    let stdout_file = match &task.stdout {
        Redirect::Ignore => {
            cmd.stdout(Stdio::null());
            None
        }
        Redirect::File(path) => {
            let file = open_output(path)?;
            let child_end = file
                .try_clone()
                .map_err(|e| SandboxError::Redirect(path.clone(), e))?;
            cmd.stdout(Stdio::from(child_end));
            Some((path.clone(), file))
        }
    };

    match &task.stderr {
        Redirect::Ignore => {
            cmd.stderr(Stdio::null());
        }
        // Same target as stdout: share the handle so the streams interleave
        // instead of clobbering each other.
        Redirect::File(path) if matches!(&stdout_file, Some((p, _)) if p == path) => {
            let (_, file) = stdout_file.as_ref().unwrap();
            let child_end = file
                .try_clone()
                .map_err(|e| SandboxError::Redirect(path.clone(), e))?;
            cmd.stderr(Stdio::from(child_end));
        }
        Redirect::File(path) => {
            cmd.stderr(Stdio::from(open_output(path)?));
        }
    }
    Ok(())
}

/// dup2 the result file onto [`RESULT_FD`] in the child. dup2-ed fds do not
/// carry CLOEXEC, so the fd survives the exec into the sandbox.
fn attach_result_fd(cmd: &mut Command, file: &std::fs::File) {
    let fd = file.as_raw_fd();
    unsafe {
        cmd.pre_exec(move || {
            if libc::dup2(fd, RESULT_FD) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

async fn parse_result(path: &Path) -> Result<ExecuteResult, SandboxError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(SandboxError::TelemetryIo)?;
    let result = serde_yaml::from_str(&text)?;
    let _ = tokio::fs::remove_file(path).await;
    Ok(result)
}

#[async_trait]
impl Sandbox for LrunSandbox {
    async fn run(&self, task: &ExecTask) -> Result<ExecuteResult, SandboxError> {
        let (result_file, result_path) = self.result_file()?;
        let mut cmd = self.command_for(task);
        apply_redirects(&mut cmd, task)?;
        attach_result_fd(&mut cmd, &result_file);

        let status = cmd.status().await.map_err(SandboxError::Launch)?;
        drop(result_file);
        if !status.success() {
            return Err(SandboxError::SandboxExit(status));
        }
        parse_result(&result_path).await
    }

    async fn run_interactive(
        &self,
        solution: &ExecTask,
        interactor: &ExecTask,
    ) -> Result<(ExecuteResult, ExecuteResult), SandboxError> {
        // Two unidirectional pipes, crossed: the interactor's stdout feeds
        // the solution's stdin and vice versa.
        let (sol_stdin, inter_stdout) = std::io::pipe().map_err(SandboxError::Launch)?;
        let (inter_stdin, sol_stdout) = std::io::pipe().map_err(SandboxError::Launch)?;

        let (sol_result_file, sol_result_path) = self.result_file()?;
        let (inter_result_file, inter_result_path) = self.result_file()?;

        let mut sol_cmd = self.command_for(solution);
        sol_cmd.stdin(Stdio::from(sol_stdin));
        sol_cmd.stdout(Stdio::from(sol_stdout));
        sol_cmd.stderr(Stdio::null());
        attach_result_fd(&mut sol_cmd, &sol_result_file);

        let mut inter_cmd = self.command_for(interactor);
        inter_cmd.stdin(Stdio::from(inter_stdin));
        inter_cmd.stdout(Stdio::from(inter_stdout));
        inter_cmd.stderr(Stdio::null());
        attach_result_fd(&mut inter_cmd, &inter_result_file);

        let mut inter_child = inter_cmd.spawn().map_err(SandboxError::Launch)?;
        let mut sol_child = sol_cmd.spawn().map_err(SandboxError::Launch)?;
        // The commands still hold the parent copies of the pipe ends; they
        // must go away or neither process ever sees EOF.
        drop(sol_cmd);
        drop(inter_cmd);

        let (_sol_status, _inter_status) =
            tokio::try_join!(sol_child.wait(), inter_child.wait())
                .map_err(SandboxError::Launch)?;
        drop(sol_result_file);
        drop(inter_result_file);

        let sol_result = parse_result(&sol_result_path).await?;
        let inter_result = parse_result(&inter_result_path).await?;
        Ok((sol_result, inter_result))
    }
}
