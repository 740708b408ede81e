//! Error type shared by the archive layer.
//!
//! Every failure aborts the operation that hit it.  [`ArchiveError::category`]
//! groups variants the way the command line reports them.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::hamming::HammingError;

pub type Result<T> = std::result::Result<T, ArchiveError>;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("cannot open archive {path}: {source}")]
    ArchiveUnavailable { path: PathBuf, source: io::Error },

    #[error("corrupted {field} at bit {bit_offset}: {source}")]
    Corrupted {
        field:      &'static str,
        bit_offset: u64,
        source:     HammingError,
    },

    #[error("archive truncated at bit {bit_offset}")]
    Truncated { bit_offset: u64 },

    #[error("entry at bit {bit_offset} declares a {file_size}-bit payload that no archive can hold")]
    PayloadOverflow { file_size: u64, bit_offset: u64 },

    #[error("refusing to extract entry with unsafe name {name:?}")]
    UnsafeEntryName { name: String },

    #[error("cannot read source file {path}: {source}")]
    SourceUnreadable { path: PathBuf, source: io::Error },

    #[error("cannot write to destination {path}: {source}")]
    DestinationUnwritable { path: PathBuf, source: io::Error },

    #[error("file name {name:?} is {len} bytes, the limit is {limit}")]
    NameTooLong { name: String, len: usize, limit: usize },

    #[error("invalid file name {name:?}")]
    InvalidName { name: String },

    #[error("unsupported chunk width: {0}")]
    UnsupportedChunkWidth(#[from] HammingError),

    #[error("no entry named {name:?} in archive")]
    EntryNotFound { name: String },

    #[error("archive already holds the maximum of {0} files")]
    ArchiveFull(u16),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse grouping used to pick a process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad caller input.
    Argument,
    /// Archive missing, unreadable or failing Hamming validation.
    Archive,
    /// Source file of an append.
    Source,
    /// Extraction target.
    Destination,
}

impl ArchiveError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ArchiveError::NameTooLong { .. }
            | ArchiveError::InvalidName { .. }
            | ArchiveError::UnsupportedChunkWidth(_)
            | ArchiveError::EntryNotFound { .. }
            | ArchiveError::ArchiveFull(_) => ErrorCategory::Argument,
            ArchiveError::SourceUnreadable { .. } => ErrorCategory::Source,
            ArchiveError::DestinationUnwritable { .. } => ErrorCategory::Destination,
            ArchiveError::ArchiveUnavailable { .. }
            | ArchiveError::Corrupted { .. }
            | ArchiveError::Truncated { .. }
            | ArchiveError::PayloadOverflow { .. }
            | ArchiveError::UnsafeEntryName { .. }
            | ArchiveError::Io(_) => ErrorCategory::Archive,
        }
    }

    /// Map a stream read failure at `bit_offset`: running out of bits means
    /// the archive is shorter than its headers claim.
    pub(crate) fn from_read(err: io::Error, bit_offset: u64) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ArchiveError::Truncated { bit_offset }
        } else {
            ArchiveError::Io(err)
        }
    }
}
