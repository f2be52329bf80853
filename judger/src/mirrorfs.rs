//! Sandbox-root overlay management.
//!
//! Restricted execution chroots into a mirror of the host filesystem that an
//! external privileged helper assembles under `/run/<name>`. The helper is
//! invoked exactly once per judging run for setup and once for teardown;
//! teardown happens on every exit path and failures there are logged, not
//! propagated.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

/// Provider of chroot-able sandbox roots. Abstracted so the judging engine
/// can run against a plain directory in tests.
#[async_trait]
pub trait SandboxRoot: Send + Sync {
    /// Assemble a root under the given name, returning the chroot path.
    async fn setup(&self, name: &str) -> io::Result<PathBuf>;

    /// Dismantle the root. Best-effort; the caller logs failures.
    async fn teardown(&self, name: &str) -> io::Result<()>;
}

/// The production overlay helper (`lrun-mirrorfs`).
pub struct MirrorFs {
    helper: PathBuf,
    config: PathBuf,
}

impl MirrorFs {
    pub fn new(helper: impl Into<PathBuf>, config: impl Into<PathBuf>) -> MirrorFs {
        MirrorFs {
            helper: helper.into(),
            config: config.into(),
        }
    }

    async fn invoke(&self, name: &str, action: &str) -> io::Result<()> {
        let status = Command::new(&self.helper)
            .arg("--name")
            .arg(name)
            .arg(action)
            .arg(&self.config)
            .status()
            .await?;
        if !status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} {} exited with {}", self.helper.display(), action, status),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxRoot for MirrorFs {
    async fn setup(&self, name: &str) -> io::Result<PathBuf> {
        tracing::info!(%name, "setting up mirror fs");
        self.invoke(name, "--setup").await?;
        Ok(chroot_path(name))
    }

    async fn teardown(&self, name: &str) -> io::Result<()> {
        tracing::info!(%name, "tearing down mirror fs");
        self.invoke(name, "--teardown").await
    }
}

/// Mount point the helper assembles roots under.
pub fn chroot_path(name: &str) -> PathBuf {
    Path::new("/run").join(name)
}
