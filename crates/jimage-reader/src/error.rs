//! Error types for the image reader.

use thiserror::Error;

/// Errors that can occur when reading an image.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Common library error.
    #[error("{0}")]
    Common(#[from] jimage_common::Error),

    /// Short file, bad magic or an index that does not fit the file.
    #[error("\"{name}\" is not an image file")]
    NotAnImage { name: String },

    /// Header version differs from the supported one.
    #[error("the image file \"{name}\" is the wrong version: {major}.{minor}")]
    WrongVersion { name: String, major: u16, minor: u16 },

    /// The index contradicts itself after a successful open.
    #[error("corrupt image index: {0}")]
    CorruptIndex(String),

    /// An offset or size outside the image.
    #[error("offset {offset} with size {size} is out of bounds")]
    OutOfBounds { offset: u64, size: u64 },

    /// Fewer bytes were read than the location promised.
    #[error("short read: {read} instead of {expected} bytes")]
    ShortRead { read: usize, expected: usize },

    /// Decompression error.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// Compressed resource names a plugin nobody registered.
    #[error("unknown decompressor: {0}")]
    UnknownDecompressor(String),

    /// Resource not found.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
}

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, Error>;
