use std::path::PathBuf;
use thiserror::Error;

use crate::index::types::FileId;

/// Errors raised by the indexing and search engine
#[derive(Error, Debug)]
pub enum IndexError {
    /// Endian marker, version or n-gram length disagrees with what the caller expects
    #[error("format mismatch in {}: {reason}", path.display())]
    FormatMismatch { path: PathBuf, reason: String },

    #[error("refusing to overwrite existing file {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("shard {shard} is missing ({})", path.display())]
    ShardMissing { shard: u32, path: PathBuf },

    /// An input file could not be read; the file is skipped, the batch continues
    #[error("failed to extract n-grams from {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    #[error("query is {len} bytes long but the index uses {ngram_length}-byte n-grams")]
    QueryTooShort { len: usize, ngram_length: usize },

    #[error("unsupported n-gram length {0} (must be 3 or 4)")]
    InvalidNgramLength(u64),

    #[error("n-gram {ngram:#x} is outside the {ngram_length}-byte domain")]
    NgramOutOfRange { ngram: u64, ngram_length: usize },

    #[error("file id {id} is not committed (catalog holds {committed} files)")]
    UnknownFileId { id: FileId, committed: u32 },

    #[error("postings for n-gram {found:#x} arrived out of order (next slot is {expected:#x})")]
    OutOfOrder { expected: u64, found: u64 },

    #[error("index builder is already closed")]
    Closed,

    #[error("a worker panicked while holding the {0} lock")]
    LockPoisoned(&'static str),

    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error on {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// Attach a path to an I/O error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::FileIo {
            path: path.into(),
            source,
        }
    }

    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IndexError::FormatMismatch {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Per-file extraction failures are the only errors a batch survives
    pub fn is_fatal(&self) -> bool {
        !matches!(self, IndexError::Extraction { .. })
    }
}
