// External crates
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs::File;

/// Device and inode pair. A change means the path now names a different file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub dev: u64,
    pub inode: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    pub fn of(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            dev: metadata.dev(),
            inode: metadata.ino(),
        }
    }

    // No stable inode outside unix; rotation falls back to size checks only.
    #[cfg(not(unix))]
    pub fn of(_metadata: &std::fs::Metadata) -> Self {
        Self { dev: 0, inode: 0 }
    }
}

/// Per-file reader position. `offset` only grows until a rotation resets it to zero.
#[derive(Debug)]
pub struct TailState {
    pub path: PathBuf,
    pub offset: u64,
    pub identity: Option<FileIdentity>,
    pub handle: Option<File>,
}

impl TailState {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            offset: 0,
            identity: None,
            handle: None,
        }
    }
}

/// Item produced by a tailer stream.
#[derive(Debug)]
pub enum TailEvent {
    Line(String),
    Error(TailError),
}

/// Filesystem failure while tailing. Never fatal to the process.
#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TailError {
    /// Failures after which the file is considered permanently unreadable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Open { source, .. } => source.kind() == io::ErrorKind::PermissionDenied,
            Self::Stat { .. } | Self::Read { .. } => false,
        }
    }
}
