//! Error types for evidence access and traversal
//!
//! Errors are split by the layer that raised them so callers can decide how
//! far a failure reaches: a container or argument error ends the run, a
//! partition or directory-entry error only skips that part of the evidence.

use std::fmt;
use std::io;

/// Result type alias used across the crate
pub type EvidenceResult<T> = Result<T, EvidenceError>;

/// Errors raised while opening, mounting, walking or reading evidence
#[derive(Debug)]
pub enum EvidenceError {
    /// The evidence container could not be opened or read
    Container(String),
    /// A partition table could not be parsed, or a hinted scheme did not match
    PartitionTable(String),
    /// No filesystem driver recognised the region at this byte offset
    FilesystemMount { offset: u64, reason: String },
    /// A directory could not be opened or enumerated
    Directory { path: String, reason: String },
    /// A single directory entry could not be resolved
    DirectoryEntry(String),
    /// File content could not be read
    ContentRead { inode: u64, reason: String },
    /// Bad caller input (unknown image type, unknown match logic, ...)
    InvalidArgument(String),
    /// I/O error outside container reads (output files, hash lists)
    Io(io::Error),
}

impl EvidenceError {
    /// True for errors scoped to one partition, directory or entry.
    ///
    /// The evidence driver logs and counts these and carries on with the
    /// rest of the image.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EvidenceError::PartitionTable(_)
                | EvidenceError::FilesystemMount { .. }
                | EvidenceError::Directory { .. }
                | EvidenceError::DirectoryEntry(_)
                | EvidenceError::ContentRead { .. }
        )
    }

    pub(crate) fn container(msg: impl Into<String>) -> Self {
        EvidenceError::Container(msg.into())
    }

    pub(crate) fn partition_table(msg: impl Into<String>) -> Self {
        EvidenceError::PartitionTable(msg.into())
    }

    pub(crate) fn directory(path: impl Into<String>, reason: impl fmt::Display) -> Self {
        EvidenceError::Directory {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn content(inode: u64, reason: impl fmt::Display) -> Self {
        EvidenceError::ContentRead {
            inode,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for EvidenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceError::Container(e) => write!(f, "Container error: {}", e),
            EvidenceError::PartitionTable(e) => write!(f, "Partition table error: {}", e),
            EvidenceError::FilesystemMount { offset, reason } => {
                write!(f, "Cannot mount filesystem at offset {}: {}", offset, reason)
            }
            EvidenceError::Directory { path, reason } => {
                write!(f, "Cannot open directory {}: {}", path, reason)
            }
            EvidenceError::DirectoryEntry(e) => write!(f, "Directory entry error: {}", e),
            EvidenceError::ContentRead { inode, reason } => {
                write!(f, "Cannot read content of inode {}: {}", inode, reason)
            }
            EvidenceError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
            EvidenceError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for EvidenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EvidenceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EvidenceError {
    fn from(err: io::Error) -> Self {
        EvidenceError::Io(err)
    }
}

impl From<csv::Error> for EvidenceError {
    fn from(err: csv::Error) -> Self {
        EvidenceError::Io(io::Error::new(io::ErrorKind::Other, err))
    }
}

impl From<serde_json::Error> for EvidenceError {
    fn from(err: serde_json::Error) -> Self {
        EvidenceError::Io(io::Error::new(io::ErrorKind::InvalidData, err))
    }
}
