//! Decoded resource location.

use crate::attributes::{self, AttributeKind, ATTRIBUTE_COUNT};
use crate::{Result, StringTable};

/// Where one named resource lives in the image, and how big it is.
///
/// String-valued slots hold offsets into the [`StringTable`]; use the
/// name accessors with the image's table to decode them. Locations are cheap
/// to copy and are recomputed on each lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Location {
    attributes: [u64; ATTRIBUTE_COUNT],
}

impl Location {
    #[inline]
    pub const fn from_attributes(attributes: [u64; ATTRIBUTE_COUNT]) -> Self {
        Self { attributes }
    }

    /// Decode the record at `offset` in the locations region.
    pub fn decode(locations: &[u8], offset: usize) -> Result<Self> {
        attributes::decompress(locations, offset).map(Self::from_attributes)
    }

    /// Whether every slot is zero, as for a spare slot of the hash table.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.attributes.iter().all(|&value| value == 0)
    }

    #[inline]
    pub const fn attributes(&self) -> &[u64; ATTRIBUTE_COUNT] {
        &self.attributes
    }

    #[inline]
    pub const fn get(&self, kind: AttributeKind) -> u64 {
        self.attributes[kind as usize]
    }

    #[inline]
    pub const fn module_offset(&self) -> u32 {
        self.get(AttributeKind::Module) as u32
    }

    #[inline]
    pub const fn parent_offset(&self) -> u32 {
        self.get(AttributeKind::Parent) as u32
    }

    #[inline]
    pub const fn base_offset(&self) -> u32 {
        self.get(AttributeKind::Base) as u32
    }

    #[inline]
    pub const fn extension_offset(&self) -> u32 {
        self.get(AttributeKind::Extension) as u32
    }

    /// Content offset relative to the end of the index.
    #[inline]
    pub const fn content_offset(&self) -> u64 {
        self.get(AttributeKind::Offset)
    }

    #[inline]
    pub const fn compressed_size(&self) -> u64 {
        self.get(AttributeKind::Compressed)
    }

    #[inline]
    pub const fn uncompressed_size(&self) -> u64 {
        self.get(AttributeKind::Uncompressed)
    }

    #[inline]
    pub const fn is_compressed(&self) -> bool {
        self.compressed_size() != 0
    }

    pub fn module(&self, strings: &StringTable<'_>) -> Result<String> {
        strings.get(self.module_offset())
    }

    pub fn parent(&self, strings: &StringTable<'_>) -> Result<String> {
        strings.get(self.parent_offset())
    }

    pub fn base(&self, strings: &StringTable<'_>) -> Result<String> {
        strings.get(self.base_offset())
    }

    pub fn extension(&self, strings: &StringTable<'_>) -> Result<String> {
        strings.get(self.extension_offset())
    }

    /// Base name with `.extension` appended when present.
    pub fn base_ext(&self, strings: &StringTable<'_>) -> Result<String> {
        let mut name = self.base(strings)?;
        if self.extension_offset() != 0 {
            name.push('.');
            name.push_str(&self.extension(strings)?);
        }
        Ok(name)
    }

    /// `/module/parent/base.ext`, optionally under `/modules`.
    pub fn full_name(&self, strings: &StringTable<'_>, modules_prefix: bool) -> Result<String> {
        let mut name = String::new();

        if self.module_offset() != 0 {
            if modules_prefix {
                name.push_str("/modules");
            }
            name.push('/');
            name.push_str(&self.module(strings)?);
            name.push('/');
        }

        if self.parent_offset() != 0 {
            name.push_str(&self.parent(strings)?);
            name.push('/');
        }

        name.push_str(&self.base_ext(strings)?);
        Ok(name)
    }

    /// Build a tree path from the selected name parts.
    ///
    /// The module part is rendered as `/modules/<module>`.
    pub fn build_name(
        &self,
        strings: &StringTable<'_>,
        include_module: bool,
        include_parent: bool,
        include_name: bool,
    ) -> Result<String> {
        let mut name = String::new();

        if include_module && self.module_offset() != 0 {
            name.push_str("/modules/");
            name.push_str(&self.module(strings)?);
        }

        if include_parent && self.parent_offset() != 0 {
            name.push('/');
            name.push_str(&self.parent(strings)?);
        }

        if include_name {
            if include_module || include_parent {
                name.push('/');
            }
            name.push_str(&self.base_ext(strings)?);
        }

        Ok(name)
    }

    /// Whether this location is the one named by `name`.
    #[inline]
    pub fn verify(&self, name: &str, strings: &StringTable<'_>) -> bool {
        attributes::verify(name, self, strings)
    }

    /// Whether this location is `name` inside `module`.
    #[inline]
    pub fn verify_module_name(&self, module: &str, name: &str, strings: &StringTable<'_>) -> bool {
        attributes::verify_module_name(module, name, self, strings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // "" java.base java/lang Object class modules java.base/java
    const STRINGS: &[u8] = b"\0java.base\0java/lang\0Object\0class\0modules\0java.base/java\0";

    fn location(module: u64, parent: u64, base: u64, ext: u64) -> Location {
        let mut attributes = [0u64; ATTRIBUTE_COUNT];
        attributes[AttributeKind::Module as usize] = module;
        attributes[AttributeKind::Parent as usize] = parent;
        attributes[AttributeKind::Base as usize] = base;
        attributes[AttributeKind::Extension as usize] = ext;
        Location::from_attributes(attributes)
    }

    #[test]
    fn test_full_name() {
        let strings = StringTable::new(STRINGS);
        let object = location(1, 11, 21, 28);
        assert_eq!(
            object.full_name(&strings, false).unwrap(),
            "/java.base/java/lang/Object.class"
        );
        assert_eq!(
            object.full_name(&strings, true).unwrap(),
            "/modules/java.base/java/lang/Object.class"
        );
    }

    #[test]
    fn test_build_name() {
        let strings = StringTable::new(STRINGS);
        let object = location(1, 11, 21, 28);
        assert_eq!(
            object.build_name(&strings, true, true, false).unwrap(),
            "/modules/java.base/java/lang"
        );
        assert_eq!(
            object.build_name(&strings, false, false, true).unwrap(),
            "Object.class"
        );
    }

    #[test]
    fn test_directory_marker_name() {
        let strings = StringTable::new(STRINGS);
        let dir = location(34, 0, 42, 0);
        assert_eq!(
            dir.full_name(&strings, false).unwrap(),
            "/modules/java.base/java"
        );
        assert!(dir.verify("/modules/java.base/java", &strings));
    }

    #[test]
    fn test_no_module() {
        let strings = StringTable::new(STRINGS);
        let bare = location(0, 0, 21, 0);
        assert_eq!(bare.full_name(&strings, true).unwrap(), "Object");
        assert!(bare.verify("Object", &strings));
    }
}
