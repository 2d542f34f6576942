//! String table view.

use jimage_common::{memchr, mutf8};

use crate::{Error, Result};

/// Read-only view over the strings region of an image.
///
/// Strings are addressed by byte offset. Offset 0 holds the empty string, so
/// a zero attribute means "absent".
#[derive(Debug, Clone, Copy)]
pub struct StringTable<'a> {
    bytes: &'a [u8],
}

impl<'a> StringTable<'a> {
    #[inline]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Size of the region in bytes.
    #[inline]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The encoded bytes of the string at `offset`, without its terminator.
    pub fn raw(&self, offset: u32) -> Result<&'a [u8]> {
        let start = offset as usize;
        let tail = self.bytes.get(start..).ok_or(Error::OutOfBounds {
            offset: offset as u64,
            size: 1,
        })?;
        let end = memchr::memchr(0, tail).ok_or_else(|| {
            Error::CorruptIndex(format!("string at offset {offset} is not terminated"))
        })?;
        Ok(&tail[..end])
    }

    /// Decode the string at `offset`.
    pub fn get(&self, offset: u32) -> Result<String> {
        Ok(mutf8::decode(self.raw(offset)?)?)
    }

    /// Compare the string at `offset` against `candidate[start..]` in place.
    ///
    /// Returns the number of candidate bytes matched when the stored string
    /// is a prefix of the remainder, `None` otherwise.
    pub fn match_at(&self, offset: u32, candidate: &str, start: usize) -> Option<usize> {
        let stored = self.raw(offset).ok()?;
        mutf8::match_prefix(stored, candidate, start)
    }

    /// Whether the string at `offset` equals `candidate` exactly.
    #[inline]
    pub fn equals(&self, offset: u32, candidate: &str) -> bool {
        self.match_at(offset, candidate, 0) == Some(candidate.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &[u8] = b"\0java.base\0java/lang\0Object\0class\0caf\xC3\xA9\0";

    #[test]
    fn test_get() {
        let strings = StringTable::new(TABLE);
        assert_eq!(strings.get(0).unwrap(), "");
        assert_eq!(strings.get(1).unwrap(), "java.base");
        assert_eq!(strings.get(21).unwrap(), "Object");
        assert_eq!(strings.get(34).unwrap(), "caf\u{e9}");
    }

    #[test]
    fn test_match_at() {
        let strings = StringTable::new(TABLE);
        assert_eq!(strings.match_at(1, "/java.base/java", 1), Some(9));
        assert_eq!(strings.match_at(1, "/java.bas", 1), None);
        assert!(strings.equals(28, "class"));
        assert!(!strings.equals(28, "classes"));
    }

    #[test]
    fn test_out_of_bounds() {
        let strings = StringTable::new(TABLE);
        assert!(matches!(strings.get(500), Err(Error::OutOfBounds { .. })));
        assert_eq!(strings.match_at(500, "x", 0), None);
    }

    #[test]
    fn test_unterminated() {
        let strings = StringTable::new(b"\0abc");
        assert!(matches!(strings.get(1), Err(Error::CorruptIndex(_))));
    }
}
