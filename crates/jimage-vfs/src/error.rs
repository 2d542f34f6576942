//! Error types for the virtual tree.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when browsing an image.
#[derive(Debug, Error)]
pub enum Error {
    /// Image reader error.
    #[error(transparent)]
    Reader(#[from] jimage_reader::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image is already open with another byte order.
    #[error("\"{}\" is already open with a different byte order", path.display())]
    ByteOrderMismatch { path: PathBuf },

    /// The handle was closed.
    #[error("image handle is closed")]
    Closed,

    /// Content was requested from a directory or link.
    #[error("not a resource: {0}")]
    NotAResource(String),

    /// A node id that does not belong to this image.
    #[error("unknown node id {0}")]
    UnknownNode(u32),
}

/// Result type for virtual tree operations.
pub type Result<T> = std::result::Result<T, Error>;
