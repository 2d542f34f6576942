//! Common utilities for jimage.
//!
//! This crate provides the foundational pieces shared by the image reader and
//! the virtual filesystem:
//!
//! - [`BinaryReader`] - Zero-copy, byte-order aware reading from byte slices
//! - [`Endian`] - The byte order an image was written in
//! - [`mutf8`] - Modified UTF-8 encoding, decoding and in-place matching
//! - [`hash`] - The multiplicative name hash used by the perfect-hash index

mod endian;
mod error;
mod reader;

pub mod hash;
pub mod mutf8;

pub use endian::Endian;
pub use error::{Error, Result};
pub use reader::BinaryReader;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Re-export memchr for terminator scanning
pub use memchr;
