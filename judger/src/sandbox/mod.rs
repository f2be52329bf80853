//! Isolated execution of untrusted processes.
//!
//! The sandbox itself is an external binary enforcing CPU/wall/memory/stack
//! limits, disabled networking and a syscall denylist; this module models it
//! as a capability ([`Sandbox`]) so that scheduling code never depends on a
//! concrete isolation backend. [`LrunSandbox`] is the production backend.

pub mod lrun;
pub mod model;

use async_trait::async_trait;

pub use self::lrun::LrunSandbox;
pub use self::model::{
    ExecTask, ExecTaskBuilder, ExecuteResult, ExitReason, Redirect, SandboxError,
};

/// An isolated-execution capability.
///
/// Implementations run one (or, for interactive problems, two) processes
/// under externally enforced limits and return structured telemetry. No
/// retries happen at this layer: a launch or telemetry failure surfaces
/// immediately.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run a single process to completion.
    async fn run(&self, task: &ExecTask) -> Result<ExecuteResult, SandboxError>;

    /// Run a solution and an interactor as two sandboxed processes with
    /// their standard streams cross-piped (each one's stdout feeds the
    /// other's stdin). Both are waited on concurrently; stdin/stdout
    /// redirects of the tasks are superseded by the pipes.
    async fn run_interactive(
        &self,
        solution: &ExecTask,
        interactor: &ExecTask,
    ) -> Result<(ExecuteResult, ExecuteResult), SandboxError>;
}
