use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid channel name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("failed to open semaphore {name}: {source}")]
    SemaphoreOpen { name: String, source: Errno },

    #[error("failed to signal semaphore {name}: {source}")]
    SemaphorePost { name: String, source: Errno },

    #[error("semaphore {name} is already at its limit of {limit}")]
    SemaphoreOverflow { name: String, limit: u32 },

    #[error("failed to wait for semaphore {name}: {source}")]
    SemaphoreWait { name: String, source: Errno },

    #[error("shared memory {name}: {source}")]
    SharedMemory { name: String, source: Errno },

    #[error("size of object must be less than or equal to {0} bytes")]
    SizeError(usize),

    #[error("object must have an alignment of {0}")]
    AlignmentError(usize),

    #[error("no block released on {name} within {timeout:?}, peer process is gone or stalled")]
    PeerTimeout {
        name: String,
        timeout: std::time::Duration,
    },

    #[error("peer process reported a failure through block {block}")]
    PeerFailed { block: usize },

    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to install interrupt handler: {source}")]
    SignalHandler { source: ctrlc::Error },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::InvalidName { .. } => 2,
            Error::SemaphoreOpen { .. }
            | Error::SemaphorePost { .. }
            | Error::SemaphoreOverflow { .. }
            | Error::SharedMemory { .. }
            | Error::SizeError(_)
            | Error::AlignmentError(_)
            | Error::SignalHandler { .. } => 3,
            Error::Io { .. } => 4,
            Error::SemaphoreWait { .. } | Error::PeerTimeout { .. } | Error::PeerFailed { .. } => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_failure_class() {
        let usage = Error::InvalidName {
            name: "a/b".into(),
            reason: "contains '/'",
        };
        assert_eq!(usage.exit_code(), 2);

        let resource = Error::SharedMemory {
            name: "/x".into(),
            source: Errno::EACCES,
        };
        assert_eq!(resource.exit_code(), 3);

        let io = Error::io("in.bin", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(io.exit_code(), 4);
        assert!(io.to_string().starts_with("in.bin: "));

        assert_eq!(Error::PeerFailed { block: 1 }.exit_code(), 5);
    }
}
