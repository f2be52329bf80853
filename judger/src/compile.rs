//! The compilation pipeline.
//!
//! Compiles a submission once, under the sandbox but without syscall
//! restrictions, with a 1 GiB memory ceiling and the language's declared
//! compile time budget. The outcome is either a compile failure (to be
//! reported as a `CE` verdict, with the captured compiler stderr as
//! diagnostics) or success, in which case the stderr is still surfaced as
//! advisory compiler output.

use std::path::Path;

use err_derive::Error;

use crate::config::JudgerConfig;
use crate::lang::{self, Language, ResolvedCommand, ResolveError};
use crate::problem::SourceSpec;
use crate::sandbox::{ExecTaskBuilder, ExecuteResult, ExitReason, Redirect, Sandbox, SandboxError};

/// Memory ceiling for compilers: 1 GiB.
const COMPILE_MEMORY_LIMIT: u64 = 1 << 30;

const COMPILE_STDERR_FILE: &str = "compile.stderr";

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(display = "{}", _0)]
    Resolve(#[error(source)] ResolveError),

    #[error(display = "compiler could not be run: {}", _0)]
    Sandbox(#[error(source)] SandboxError),

    #[error(display = "IO error during compilation: {}", _0)]
    Io(#[error(source)] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct CompileReport {
    /// False means the submission failed to compile (a user-attributable
    /// `CE`, not an engine failure).
    pub success: bool,
    /// Captured compiler stderr: diagnostics on failure, warnings on
    /// success.
    pub compiler_output: String,
    pub result: ExecuteResult,
    pub command: ResolvedCommand,
    pub language: Language,
}

/// Compile `code` inside `workdir`, staging the submitted file under the
/// language's canonical source name first. On success the resolved
/// executable path is recorded back into `code`.
pub async fn compile(
    code: &mut SourceSpec,
    conf: &JudgerConfig,
    sandbox: &dyn Sandbox,
    workdir: &Path,
) -> Result<CompileReport, CompileError> {
    tracing::info!(language = %code.language, "compiling submission");

    let (command, language) = lang::resolve(code, conf, Some(workdir), true)?;
    if Path::new(&code.source) != command.source {
        tokio::fs::copy(&code.source, &command.source).await?;
    }

    let stderr_path = workdir.join(COMPILE_STDERR_FILE);
    let task = ExecTaskBuilder::default()
        .cmd(command.compile.clone())
        .time_limit(language.compile.time_limit)
        .memory_limit(COMPILE_MEMORY_LIMIT)
        .stderr(Redirect::File(stderr_path.clone()))
        .build()
        .expect("compile task is fully specified");

    let result = sandbox.run(&task).await?;
    let compiler_output = tokio::fs::read_to_string(&stderr_path)
        .await
        .unwrap_or_default();

    code.compile_result = Some(result.clone());

    if result.exit_reason != ExitReason::None {
        tracing::info!(reason = ?result.exit_reason, "compiler exceeded its limits");
        return Ok(CompileReport {
            success: false,
            compiler_output: format!(
                "Compiler exited with {:?}\n{}",
                result.exit_reason, compiler_output
            ),
            result,
            command,
            language,
        });
    }

    let artifact_exists = tokio::fs::metadata(&command.executable).await.is_ok();
    if !result.is_clean() || !artifact_exists {
        tracing::info!(
            exit_code = result.exit_code,
            artifact_exists,
            "compilation failed"
        );
        return Ok(CompileReport {
            success: false,
            compiler_output,
            result,
            command,
            language,
        });
    }

    code.executable = Some(command.executable.display().to_string());
    Ok(CompileReport {
        success: true,
        compiler_output,
        result,
        command,
        language,
    })
}
