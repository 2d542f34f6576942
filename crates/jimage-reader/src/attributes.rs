//! Location attribute codec and name verification.
//!
//! A location record is a self-terminating byte stream. Each attribute is a
//! header byte `kind << 3 | (length - 1)` followed by `length` big-endian
//! value bytes; any header byte `<= 7` ends the record.
//!
//! Name verification answers whether a queried name is the one a record
//! describes, reading the module/parent/base/extension strings in place. It
//! is what makes a perfect-hash hit trustworthy: a name absent from the image
//! still hashes to some occupied slot.

use jimage_common::BinaryReader;

use crate::{Error, Location, Result, StringTable};

/// Number of attribute slots, including the unused `End` slot.
pub const ATTRIBUTE_COUNT: usize = 8;

/// Attribute kinds, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttributeKind {
    End = 0,
    /// String offset of the module name.
    Module = 1,
    /// String offset of the parent path.
    Parent = 2,
    /// String offset of the base name.
    Base = 3,
    /// String offset of the extension.
    Extension = 4,
    /// Content offset relative to the end of the index.
    Offset = 5,
    /// Stored size when compressed, else 0.
    Compressed = 6,
    Uncompressed = 7,
}

impl TryFrom<u8> for AttributeKind {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::End),
            1 => Ok(Self::Module),
            2 => Ok(Self::Parent),
            3 => Ok(Self::Base),
            4 => Ok(Self::Extension),
            5 => Ok(Self::Offset),
            6 => Ok(Self::Compressed),
            7 => Ok(Self::Uncompressed),
            other => Err(other),
        }
    }
}

/// Next `(kind, value)` pair, or `None` at the end of the record.
fn next_attribute(reader: &mut BinaryReader<'_>) -> Result<Option<(usize, u64)>> {
    if reader.is_empty() {
        return Ok(None);
    }

    let header = reader.read_u8()?;
    if header <= 0x7 {
        return Ok(None);
    }

    let kind = (header >> 3) as usize;
    if kind >= ATTRIBUTE_COUNT {
        return Err(Error::CorruptIndex(format!("invalid attribute kind: {kind}")));
    }

    let length = (header & 0x7) as usize + 1;
    let value = reader
        .read_be_uint(length)
        .map_err(|_| Error::CorruptIndex("missing attribute data".into()))?;
    Ok(Some((kind, value)))
}

/// Decode the record starting at `offset`.
pub fn decompress(bytes: &[u8], offset: usize) -> Result<[u64; ATTRIBUTE_COUNT]> {
    if offset > bytes.len() {
        return Err(Error::OutOfBounds {
            offset: offset as u64,
            size: 1,
        });
    }

    let mut attributes = [0u64; ATTRIBUTE_COUNT];
    let mut reader = BinaryReader::new(bytes);
    reader.seek(offset);

    while let Some((kind, value)) = next_attribute(&mut reader)? {
        attributes[kind] = value;
    }

    Ok(attributes)
}

/// Encode a record. Slot 0 is ignored; zero slots are omitted.
pub fn compress(attributes: &[u64; ATTRIBUTE_COUNT]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ATTRIBUTE_COUNT * 3);

    for (kind, &value) in attributes.iter().enumerate().skip(1) {
        if value == 0 {
            continue;
        }
        let n = (63 - value.leading_zeros()) as usize >> 3;
        out.push(((kind as u8) << 3) | n as u8);
        for i in (0..=n).rev() {
            out.push((value >> (i * 8)) as u8);
        }
    }

    out.push((AttributeKind::End as u8) << 3);
    out
}

/// Check `name` (`/module/parent/base.ext`) against a decoded location.
pub fn verify(name: &str, location: &Location, strings: &StringTable<'_>) -> bool {
    let bytes = name.as_bytes();
    let length = bytes.len();
    let mut index = 0;

    let module = location.module_offset();
    if module != 0 && length >= 1 {
        let Some(module_len) = strings.match_at(module, name, 1) else {
            return false;
        };
        index = module_len + 1;
        if length <= index || bytes[0] != b'/' || bytes[index] != b'/' {
            return false;
        }
        index += 1;
    }

    verify_name(
        name,
        index,
        location.parent_offset(),
        location.base_offset(),
        location.extension_offset(),
        strings,
    )
}

/// Check a `(module, name)` pair against a decoded location.
pub fn verify_module_name(
    module: &str,
    name: &str,
    location: &Location,
    strings: &StringTable<'_>,
) -> bool {
    verify_module(module, location.module_offset(), strings)
        && verify_name(
            name,
            0,
            location.parent_offset(),
            location.base_offset(),
            location.extension_offset(),
            strings,
        )
}

/// Check a `(module, name)` pair straight from the locations bytes.
///
/// Only the four name slots are extracted; content attributes are skipped
/// without building a [`Location`].
pub fn verify_raw(
    module: &str,
    name: &str,
    locations: &[u8],
    offset: usize,
    strings: &StringTable<'_>,
) -> Result<bool> {
    if offset > locations.len() {
        return Err(Error::OutOfBounds {
            offset: offset as u64,
            size: 1,
        });
    }

    let mut reader = BinaryReader::new(locations);
    reader.seek(offset);

    let (mut module_offset, mut parent, mut base, mut extension) = (0u32, 0u32, 0u32, 0u32);
    while let Some((kind, value)) = next_attribute(&mut reader)? {
        match AttributeKind::try_from(kind as u8) {
            Ok(AttributeKind::Module) => module_offset = value as u32,
            Ok(AttributeKind::Parent) => parent = value as u32,
            Ok(AttributeKind::Base) => base = value as u32,
            Ok(AttributeKind::Extension) => extension = value as u32,
            _ => {}
        }
    }

    Ok(verify_module(module, module_offset, strings)
        && verify_name(name, 0, parent, base, extension, strings))
}

#[inline]
fn verify_module(module: &str, module_offset: u32, strings: &StringTable<'_>) -> bool {
    if module_offset == 0 {
        return module.is_empty();
    }
    strings.equals(module_offset, module)
}

/// Match `parent/base.ext` against `name[index..]`, requiring full consumption.
fn verify_name(
    name: &str,
    mut index: usize,
    parent: u32,
    base: u32,
    extension: u32,
    strings: &StringTable<'_>,
) -> bool {
    let bytes = name.as_bytes();
    let length = bytes.len();

    if parent != 0 {
        let Some(parent_len) = strings.match_at(parent, name, index) else {
            return false;
        };
        index += parent_len;
        if length <= index || bytes[index] != b'/' {
            return false;
        }
        index += 1;
    }

    let Some(base_len) = strings.match_at(base, name, index) else {
        return false;
    };
    index += base_len;

    if extension != 0 {
        if length <= index || bytes[index] != b'.' {
            return false;
        }
        index += 1;
        let Some(ext_len) = strings.match_at(extension, name, index) else {
            return false;
        };
        index += ext_len;
    }

    length == index
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // "" java.base java/lang Object class
    const STRINGS: &[u8] = b"\0java.base\0java/lang\0Object\0class\0";

    fn object_class() -> Location {
        let mut attributes = [0u64; ATTRIBUTE_COUNT];
        attributes[AttributeKind::Module as usize] = 1;
        attributes[AttributeKind::Parent as usize] = 11;
        attributes[AttributeKind::Base as usize] = 21;
        attributes[AttributeKind::Extension as usize] = 28;
        attributes[AttributeKind::Uncompressed as usize] = 1234;
        Location::from_attributes(attributes)
    }

    #[test]
    fn test_compress_layout() {
        let mut attributes = [0u64; ATTRIBUTE_COUNT];
        attributes[AttributeKind::Base as usize] = 5;
        attributes[AttributeKind::Uncompressed as usize] = 0x1234;
        assert_eq!(compress(&attributes), vec![0x18, 0x05, 0x39, 0x12, 0x34, 0x00]);
    }

    #[test]
    fn test_decompress_stops_at_terminator() {
        let bytes = [0x18, 0x05, 0x03, 0x20, 0x07];
        let attributes = decompress(&bytes, 0).unwrap();
        assert_eq!(attributes[AttributeKind::Base as usize], 5);
        assert_eq!(attributes[AttributeKind::Extension as usize], 0);
    }

    #[test]
    fn test_decompress_missing_bytes() {
        assert!(matches!(
            decompress(&[0x39, 0x12], 0),
            Err(Error::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_verify_full_name() {
        let strings = StringTable::new(STRINGS);
        let location = object_class();
        assert!(verify("/java.base/java/lang/Object.class", &location, &strings));
        assert!(!verify("/java.base/java/lang/Object.clas", &location, &strings));
        assert!(!verify("/java.base/java/lang/Object.classes", &location, &strings));
        assert!(!verify("/java.base/java/lang/Object", &location, &strings));
        assert!(!verify("java.base/java/lang/Object.class", &location, &strings));
        assert!(!verify("/java.desktop/java/lang/Object.class", &location, &strings));
    }

    #[test]
    fn test_verify_module_name() {
        let strings = StringTable::new(STRINGS);
        let location = object_class();
        assert!(verify_module_name("java.base", "java/lang/Object.class", &location, &strings));
        assert!(!verify_module_name("java.bas", "java/lang/Object.class", &location, &strings));
        assert!(!verify_module_name("", "java/lang/Object.class", &location, &strings));
    }

    #[test]
    fn test_verify_raw_agrees() {
        let strings = StringTable::new(STRINGS);
        let mut locations = vec![0u8];
        let offset = locations.len();
        locations.extend(compress(object_class().attributes()));

        assert!(verify_raw("java.base", "java/lang/Object.class", &locations, offset, &strings).unwrap());
        assert!(!verify_raw("java.base", "java/lang/Thread.class", &locations, offset, &strings).unwrap());
    }

    #[test]
    fn test_verify_raw_rejects_bad_kind() {
        let strings = StringTable::new(STRINGS);
        // kind 9
        let locations = [0x48, 0x01, 0x00];
        assert!(verify_raw("m", "n", &locations, 0, &strings).is_err());
    }

    proptest! {
        #[test]
        fn compress_round_trips(values in proptest::array::uniform7(any::<u64>())) {
            let mut attributes = [0u64; ATTRIBUTE_COUNT];
            attributes[1..].copy_from_slice(&values);
            let bytes = compress(&attributes);
            prop_assert_eq!(decompress(&bytes, 0).unwrap(), attributes);
        }
    }
}
