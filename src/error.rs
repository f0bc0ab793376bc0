use thiserror::Error;

/// Failure taxonomy for the core (see the error-handling design notes).
///
/// Locally recoverable conditions — Huffman protocol errors, alignment
/// failure, a missing replacement during replay — are *not* represented
/// here; they stay as `bool`/`Option` returns on the operation that can
/// absorb them. This enum is for conditions the caller must act on.
#[derive(Debug, Error)]
pub enum ZipRecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed DB container: {0}")]
    MalformedContainer(&'static str),

    #[error("allocation failure while {0}")]
    Allocation(&'static str),

    #[error("operation requires an open input file")]
    NoInputFile,

    #[error("operation requires an open output file")]
    NoOutputFile,
}

pub type Result<T> = std::result::Result<T, ZipRecError>;
