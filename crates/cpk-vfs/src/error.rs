//! Error types for CPK mounting and reads

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while parsing archives or resolving virtual paths.
#[derive(Error, Debug)]
pub enum CpkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file is not a recognized CPK package (bad label, version or size).
    #[error("Invalid archive format in {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    /// Entry metadata references data outside the archive or is inconsistent.
    #[error("Corrupt entry in {path}: {reason}")]
    CorruptEntry { path: PathBuf, reason: String },

    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Unsupported code page: {0}")]
    UnsupportedCodePage(u32),

    #[error("Archive already mounted: {0}")]
    AlreadyMounted(PathBuf),

    #[error("Decompression failed in {path}: {reason}")]
    Decompression { path: PathBuf, reason: String },
}

impl CpkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptEntry {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error means the archive itself is unusable, as opposed to
    /// a missing file or a caller-side problem.
    pub fn is_archive_damage(&self) -> bool {
        matches!(
            self,
            Self::Format { .. } | Self::CorruptEntry { .. } | Self::Decompression { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CpkError>;

/// Errors reported by the mount orchestrator.
///
/// Only the first failing archive of a request is reported; the remaining
/// archives are not attempted.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Failed to mount {archive}: {source}")]
    Archive {
        /// Relative archive path as given in the mount request
        archive: PathBuf,
        #[source]
        source: CpkError,
    },

    #[error("Mount worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("Mount runtime error: {0}")]
    Runtime(String),

    #[error("No game data folder candidates to try")]
    NoCandidates,
}

impl OrchestratorError {
    /// The archive that failed, if the failure was archive-level.
    pub fn archive(&self) -> Option<&std::path::Path> {
        match self {
            Self::Archive { archive, .. } => Some(archive),
            _ => None,
        }
    }
}
