//! Virtual file tree over Java runtime images.
//!
//! The flat name index of an image is exposed as a directory tree that is
//! materialized on demand:
//!
//! - `/modules/<module>/...` holds directories and resource leaves
//! - `/packages/<package>/<module>` holds links into `/modules/<module>`
//!
//! Handles opened on the same path share one reader and one tree.
//!
//! # Example
//!
//! ```no_run
//! use jimage_vfs::ImageReader;
//!
//! let reader = ImageReader::open("lib/modules")?;
//! if let Some(node) = reader.find_node("/modules/java.base/java/lang/Object.class")? {
//!     let bytes = reader.read_node(&node)?;
//!     println!("{} bytes", bytes.len());
//! }
//! reader.close()?;
//! # Ok::<(), jimage_vfs::Error>(())
//! ```

mod error;
mod node;
mod shared;
mod tree;

pub use error::{Error, Result};
pub use node::{FileAttributes, Node, NodeFlags, NodeId, NodeKind, ResourceInfo};
pub use shared::{ImageReader, SharedImageReader};
