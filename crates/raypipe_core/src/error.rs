//! Run-level errors and their severity classes.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::device::DeviceError;
use crate::output::OutputError;
use crate::reader::ReadError;
use crate::registry::RegistryError;

/// Severity class of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad configuration or request
    User,
    /// Resource failure: memory, reads, writes, unreadable files
    System,
    /// Internal invariant violated
    Consistency,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::User => "user error",
            ErrorKind::System => "system error",
            ErrorKind::Consistency => "internal error",
        })
    }
}

/// Errors that end a run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("write error: {0}")]
    Io(#[from] io::Error),

    #[error("read error: {0}")]
    Read(#[from] ReadError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("{0}")]
    Config(String),

    #[error("unexpected EOF on input ({remaining} rays missing)")]
    UnexpectedEof { remaining: u64 },

    #[error("worker {worker} died: {reason}")]
    WorkerDied { worker: usize, reason: String },

    #[error("out of memory growing ray cache to {requested} entries")]
    OutOfMemory { requested: usize },

    #[error("{0}")]
    Consistency(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Io(_) | PipelineError::Read(_) => ErrorKind::System,
            PipelineError::Registry(e) => e.kind(),
            PipelineError::Output(_) => ErrorKind::User,
            PipelineError::Device(_) => ErrorKind::System,
            PipelineError::Config(_)
            | PipelineError::UnexpectedEof { .. }
            | PipelineError::WorkerDied { .. } => ErrorKind::User,
            PipelineError::OutOfMemory { .. } => ErrorKind::System,
            PipelineError::Consistency(_) => ErrorKind::Consistency,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            PipelineError::UnexpectedEof { remaining: 3 }.kind(),
            ErrorKind::User
        );
        assert_eq!(
            PipelineError::OutOfMemory { requested: 64 }.kind(),
            ErrorKind::System
        );
        assert_eq!(
            PipelineError::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe")).kind(),
            ErrorKind::System
        );
        assert_eq!(
            PipelineError::Consistency("botched output format".into()).kind(),
            ErrorKind::Consistency
        );
        assert_eq!(
            PipelineError::from(RegistryError::Duplicate("wall".into())).kind(),
            ErrorKind::User
        );
    }

    #[test]
    fn test_messages() {
        let err = PipelineError::WorkerDied {
            worker: 2,
            reason: "boom".into(),
        };
        assert_eq!(err.to_string(), "worker 2 died: boom");
        assert_eq!(ErrorKind::System.to_string(), "system error");
    }
}
