//! Fire-and-forget progress reporting over UDP.
//!
//! The judging host may listen for coarse progress datagrams (stage markers
//! plus a 0-100 percentage). Reporting must never block or fail the judging
//! path: an unconfigured or unreachable sink silently degrades to a no-op.

use std::net::UdpSocket;
use std::sync::Arc;

use crate::util::random_name;

/// Coarse stages of a judging run, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    WorkDirReady,
    FilesStaged,
    Compiled,
    Judging,
    Finished,
}

impl Stage {
    pub fn code(self) -> &'static str {
        match self {
            Stage::WorkDirReady => "00",
            Stage::FilesStaged => "01",
            Stage::Compiled => "02",
            Stage::Judging => "10",
            Stage::Finished => "FF",
        }
    }
}

#[derive(Clone, Default)]
pub struct StatusReporter {
    inner: Option<Arc<Inner>>,
}

struct Inner {
    socket: UdpSocket,
    uid: String,
}

impl StatusReporter {
    /// A reporter that swallows everything.
    pub fn noop() -> Self {
        StatusReporter { inner: None }
    }

    /// Connect to a `host:port` status sink. Any setup failure downgrades
    /// the reporter to a no-op instead of failing the run.
    pub fn connect(addr: &str, uid: Option<String>) -> Self {
        let uid = uid.unwrap_or_else(random_name);
        let socket = UdpSocket::bind("0.0.0.0:0").and_then(|s| {
            s.connect(addr)?;
            s.set_nonblocking(true)?;
            Ok(s)
        });
        match socket {
            Ok(socket) => StatusReporter {
                inner: Some(Arc::new(Inner { socket, uid })),
            },
            Err(err) => {
                tracing::warn!(%addr, %err, "status sink unreachable, reporting disabled");
                StatusReporter::noop()
            }
        }
    }

    /// Send one status datagram. Errors are logged and dropped.
    pub fn report(&self, stage: Stage, progress: u8) {
        let inner = match &self.inner {
            Some(inner) => inner,
            None => return,
        };
        let payload = format!("{}|{}|{}", inner.uid, stage.code(), progress);
        let frame = format!("01{:08x}{}", payload.len(), payload);
        if let Err(err) = inner.socket.send(frame.as_bytes()) {
            log::debug!("failed to send status datagram: {}", err);
        }
    }
}
