//! Image header.

use jimage_common::{BinaryReader, Endian};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{Error, Result};

/// Image magic number.
pub const IMAGE_MAGIC: u32 = 0xCAFE_DADA;

/// Supported major version.
pub const MAJOR_VERSION: u16 = 1;

/// Supported minor version.
pub const MINOR_VERSION: u16 = 0;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 28;

/// On-disk header, fields kept as raw bytes.
///
/// Every field is stored in the image byte order, which is only known at
/// open time, so decoding goes through [`Endian`].
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct RawHeader {
    magic: [u8; 4],
    /// `major << 16 | minor`
    version: [u8; 4],
    flags: [u8; 4],
    resource_count: [u8; 4],
    table_length: [u8; 4],
    locations_size: [u8; 4],
    strings_size: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<RawHeader>() == HEADER_SIZE);

/// Decoded image header.
///
/// ```text
/// offset  field
///  0      magic            u32
///  4      version          u32 (major << 16 | minor)
///  8      flags            u32
/// 12      resource_count   u32
/// 16      table_length     u32
/// 20      locations_size   u32
/// 24      strings_size     u32
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ImageHeader {
    pub magic: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub flags: u32,
    pub resource_count: u32,
    pub table_length: u32,
    pub locations_size: u32,
    pub strings_size: u32,
}

impl ImageHeader {
    /// Create a header for the current version.
    pub fn new(resource_count: u32, table_length: u32, locations_size: u32, strings_size: u32) -> Self {
        Self {
            magic: IMAGE_MAGIC,
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            flags: 0,
            resource_count,
            table_length,
            locations_size,
            strings_size,
        }
    }

    /// Decode and validate a header.
    ///
    /// `name` only feeds error messages.
    pub fn parse(bytes: &[u8], endian: Endian, name: &str) -> Result<Self> {
        let not_an_image = || Error::NotAnImage {
            name: name.to_string(),
        };

        if bytes.len() < HEADER_SIZE {
            return Err(not_an_image());
        }

        let raw: RawHeader = BinaryReader::new(bytes)
            .read_struct()
            .map_err(|_| not_an_image())?;

        let magic = endian.read_u32(&raw.magic);
        if magic != IMAGE_MAGIC {
            return Err(not_an_image());
        }

        let version = endian.read_u32(&raw.version);
        let major_version = (version >> 16) as u16;
        let minor_version = (version & 0xFFFF) as u16;
        if major_version != MAJOR_VERSION || minor_version != MINOR_VERSION {
            return Err(Error::WrongVersion {
                name: name.to_string(),
                major: major_version,
                minor: minor_version,
            });
        }

        Ok(Self {
            magic,
            major_version,
            minor_version,
            flags: endian.read_u32(&raw.flags),
            resource_count: endian.read_u32(&raw.resource_count),
            table_length: endian.read_u32(&raw.table_length),
            locations_size: endian.read_u32(&raw.locations_size),
            strings_size: endian.read_u32(&raw.strings_size),
        })
    }

    /// Encode the header in the given byte order.
    pub fn to_bytes(&self, endian: Endian) -> [u8; HEADER_SIZE] {
        let version = ((self.major_version as u32) << 16) | self.minor_version as u32;
        let mut raw = RawHeader {
            magic: [0; 4],
            version: [0; 4],
            flags: [0; 4],
            resource_count: [0; 4],
            table_length: [0; 4],
            locations_size: [0; 4],
            strings_size: [0; 4],
        };
        endian.write_u32(&mut raw.magic, self.magic);
        endian.write_u32(&mut raw.version, version);
        endian.write_u32(&mut raw.flags, self.flags);
        endian.write_u32(&mut raw.resource_count, self.resource_count);
        endian.write_u32(&mut raw.table_length, self.table_length);
        endian.write_u32(&mut raw.locations_size, self.locations_size);
        endian.write_u32(&mut raw.strings_size, self.strings_size);

        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    #[inline]
    pub fn redirect_size(&self) -> usize {
        self.table_length as usize * 4
    }

    #[inline]
    pub fn offsets_size(&self) -> usize {
        self.table_length as usize * 4
    }

    #[inline]
    pub fn redirect_offset(&self) -> usize {
        HEADER_SIZE
    }

    #[inline]
    pub fn offsets_offset(&self) -> usize {
        self.redirect_offset() + self.redirect_size()
    }

    #[inline]
    pub fn locations_offset(&self) -> usize {
        self.offsets_offset() + self.offsets_size()
    }

    #[inline]
    pub fn strings_offset(&self) -> usize {
        self.locations_offset() + self.locations_size as usize
    }

    /// Total size of header plus index; resource content starts here.
    #[inline]
    pub fn index_size(&self) -> usize {
        self.strings_offset() + self.strings_size as usize
    }
}
