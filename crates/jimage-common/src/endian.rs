//! Byte order of an image file.

use std::fmt;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::Error;

/// The byte order an image was written in.
///
/// Images are produced for one platform and store every multi-byte header and
/// index field in that platform's order. The order is supplied by the caller
/// at open time and fixed for the life of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Endian {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl Endian {
    /// The byte order of the running platform.
    #[inline]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    #[inline]
    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Self::Little => LittleEndian::read_u32(buf),
            Self::Big => BigEndian::read_u32(buf),
        }
    }

    #[inline]
    pub fn read_i32(self, buf: &[u8]) -> i32 {
        match self {
            Self::Little => LittleEndian::read_i32(buf),
            Self::Big => BigEndian::read_i32(buf),
        }
    }

    #[inline]
    pub fn read_u64(self, buf: &[u8]) -> u64 {
        match self {
            Self::Little => LittleEndian::read_u64(buf),
            Self::Big => BigEndian::read_u64(buf),
        }
    }

    #[inline]
    pub fn write_u32(self, buf: &mut [u8], value: u32) {
        match self {
            Self::Little => LittleEndian::write_u32(buf, value),
            Self::Big => BigEndian::write_u32(buf, value),
        }
    }

    #[inline]
    pub fn write_i32(self, buf: &mut [u8], value: i32) {
        match self {
            Self::Little => LittleEndian::write_i32(buf, value),
            Self::Big => BigEndian::write_i32(buf, value),
        }
    }

    #[inline]
    pub fn write_u64(self, buf: &mut [u8], value: u64) {
        match self {
            Self::Little => LittleEndian::write_u64(buf, value),
            Self::Big => BigEndian::write_u64(buf, value),
        }
    }
}

impl Default for Endian {
    fn default() -> Self {
        Self::native()
    }
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Little => f.write_str("little"),
            Self::Big => f.write_str("big"),
        }
    }
}

impl FromStr for Endian {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "little" | "le" => Ok(Self::Little),
            "big" | "be" => Ok(Self::Big),
            "native" => Ok(Self::native()),
            _ => Err(Error::UnknownByteOrder(s.to_string())),
        }
    }
}
