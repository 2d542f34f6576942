//! Error types for jimage-common.

use thiserror::Error;

/// Common error type for jimage operations.
#[derive(Debug, Error)]
pub enum Error {
    /// End of buffer reached while reading.
    #[error("unexpected end of buffer: needed {needed} bytes but only {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    /// A byte sequence that is not valid modified UTF-8.
    #[error("invalid modified UTF-8 sequence at byte {position}")]
    InvalidModifiedUtf8 { position: usize },

    /// Missing null terminator in string.
    #[error("string missing null terminator")]
    MissingNullTerminator,

    /// Unrecognised byte order name.
    #[error("unknown byte order: {0}")]
    UnknownByteOrder(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
