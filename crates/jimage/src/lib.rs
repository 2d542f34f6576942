//! jimage - Java runtime module image reading library.
//!
//! This crate provides a unified interface to the jimage crates for reading
//! the `lib/modules` image of a Java runtime.
//!
//! # Crates
//!
//! - [`jimage_common`] - Common utilities (byte order, modified UTF-8, name hashing)
//! - [`jimage_reader`] - Image header, perfect-hash index, attributes and content
//! - [`jimage_vfs`] - Virtual `/modules` and `/packages` tree with shared readers
//!
//! # Example
//!
//! ```no_run
//! use jimage::prelude::*;
//!
//! // Name-based access
//! let image = ImageFile::open("lib/modules")?;
//! if let Some(location) = image.find_location_in("java.base", "java/lang/Object.class")? {
//!     let data = image.read(&location)?;
//!     println!("Object.class: {} bytes", data.len());
//! }
//!
//! // Tree-based access
//! let reader = ImageReader::open("lib/modules")?;
//! let root = reader.root_directory()?;
//! for child in reader.children(&root)? {
//!     println!("{}", child.name());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Re-export all sub-crates
pub use jimage_common as common;
pub use jimage_reader as reader;
pub use jimage_vfs as vfs;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use jimage_common::{BinaryReader, Endian};
    pub use jimage_reader::{
        AccessStrategy, Decompressor, ImageFile, ImageHeader, ImageOptions, Location,
    };
    pub use jimage_vfs::{ImageReader, Node, NodeKind};
}

/// Errors from any jimage layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Common(#[from] jimage_common::Error),

    #[error(transparent)]
    Reader(#[from] jimage_reader::Error),

    #[error(transparent)]
    Vfs(#[from] jimage_vfs::Error),
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
