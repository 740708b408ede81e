pub mod bitstream;
pub mod hamming;
pub mod header;
pub mod archive;
pub mod error;

pub use archive::{Archive, FileInfo, VerifyReport};
pub use error::{ArchiveError, ErrorCategory, Result};
pub use hamming::{ChunkCode, HammingError};
pub use header::{ArchiveHeader, FileHeader, DEFAULT_CHUNK_BITS};
