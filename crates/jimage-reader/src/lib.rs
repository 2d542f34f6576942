//! Reader for Java runtime module images.
//!
//! An image packs many named resources (class files, module metadata, string
//! tables) into one read-only file. Resources are found by name through a
//! perfect-hash index:
//!
//! - A fixed 28-byte header, stored in the image byte order
//! - A redirect table and an offsets table forming a two-level perfect hash
//! - Variable-length attribute records describing each resource
//! - A table of null-terminated modified UTF-8 strings
//! - Raw or compressed resource content following the index
//!
//! # Performance
//!
//! - Zero-copy index access over a memory mapping
//! - Allocation-free name verification against the string table
//! - Whole-file mapping, or index-only mapping with pooled read buffers
//! - Parallel reads with rayon (with `parallel` feature)
//!
//! # Example
//!
//! ```no_run
//! use jimage_reader::ImageFile;
//!
//! let image = ImageFile::open("lib/modules")?;
//!
//! if let Some(location) = image.find_location_in("java.base", "java/lang/Object.class")? {
//!     let bytes = image.read(&location)?;
//!     println!("{} bytes", bytes.len());
//! }
//! # Ok::<(), jimage_reader::Error>(())
//! ```

mod error;
mod header;
mod image;
mod location;
mod options;
mod strings;

pub mod attributes;
pub mod buffer_cache;
pub mod decompress;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use attributes::{AttributeKind, ATTRIBUTE_COUNT};
pub use decompress::{Decompressor, DecompressorRegistry, StringProvider};
pub use error::{Error, Result};
pub use header::{ImageHeader, HEADER_SIZE, IMAGE_MAGIC, MAJOR_VERSION, MINOR_VERSION};
pub use image::ImageFile;
pub use location::Location;
pub use options::{AccessStrategy, ImageOptions};
pub use strings::StringTable;

pub use jimage_common::Endian;
