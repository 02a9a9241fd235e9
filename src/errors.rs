use std::io;

use thiserror::Error;

/// Error taxonomy for the supervisor core.
///
/// Configuration problems abort startup and are reported to the operator;
/// I/O problems carry the underlying errno back to the caller; lock failures
/// other than deadlock abandon the affected monitor task without taking the
/// supervisor down.
#[derive(Debug, Error)]
pub enum ProcmonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("lock operation failed: {0}")]
    Lock(io::Error),

    #[error("failed to spawn {id}: {source}")]
    Spawn { id: String, source: io::Error },

    #[error("no such process: {0}")]
    UnknownProcess(String),

    #[error("dependency cycle involving: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

impl ProcmonError {
    /// Exit status for the short-lived CLI invocations: the underlying errno
    /// where one exists, otherwise 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProcmonError::Io(e) | ProcmonError::Lock(e) | ProcmonError::Spawn { source: e, .. } => {
                e.raw_os_error().unwrap_or(1)
            }
            _ => 1,
        }
    }
}

impl From<nix::errno::Errno> for ProcmonError {
    fn from(errno: nix::errno::Errno) -> Self {
        ProcmonError::Io(io::Error::from_raw_os_error(errno as i32))
    }
}
