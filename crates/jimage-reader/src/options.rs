//! Open-time configuration.

use std::sync::Arc;

use jimage_common::Endian;

use crate::decompress::{Decompressor, DecompressorRegistry};

/// How resource content is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum AccessStrategy {
    /// Pick by platform: whole-file mapping on 64-bit targets.
    #[default]
    Auto,
    /// Map the whole file; content reads are slices of the mapping.
    MapAll,
    /// Map only the index; content is read from the file into pooled buffers.
    IndexOnly,
}

impl AccessStrategy {
    /// Collapse `Auto` into a concrete strategy.
    pub const fn resolve(self) -> Self {
        match self {
            Self::Auto if cfg!(target_pointer_width = "64") => Self::MapAll,
            Self::Auto => Self::IndexOnly,
            other => other,
        }
    }
}

/// Options for opening an image.
///
/// ```
/// use jimage_reader::{AccessStrategy, Endian, ImageOptions};
///
/// let options = ImageOptions::default()
///     .with_endian(Endian::Big)
///     .with_access(AccessStrategy::IndexOnly);
/// assert_eq!(options.endian(), Endian::Big);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ImageOptions {
    endian: Endian,
    access: AccessStrategy,
    decompressors: DecompressorRegistry,
}

impl ImageOptions {
    /// Byte order the image was written in.
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn with_access(mut self, access: AccessStrategy) -> Self {
        self.access = access;
        self
    }

    /// Register an additional decompression plugin.
    pub fn with_decompressor(mut self, plugin: Arc<dyn Decompressor>) -> Self {
        self.decompressors.register(plugin);
        self
    }

    /// Replace the whole plugin set.
    pub fn with_decompressors(mut self, registry: DecompressorRegistry) -> Self {
        self.decompressors = registry;
        self
    }

    #[inline]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    #[inline]
    pub fn access(&self) -> AccessStrategy {
        self.access
    }

    #[inline]
    pub fn decompressors(&self) -> &DecompressorRegistry {
        &self.decompressors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_resolves() {
        let resolved = AccessStrategy::Auto.resolve();
        assert_ne!(resolved, AccessStrategy::Auto);
        assert_eq!(AccessStrategy::IndexOnly.resolve(), AccessStrategy::IndexOnly);
        assert_eq!(AccessStrategy::MapAll.resolve(), AccessStrategy::MapAll);
    }

    #[test]
    fn test_defaults() {
        let options = ImageOptions::default();
        assert_eq!(options.endian(), Endian::native());
        assert_eq!(options.access(), AccessStrategy::Auto);
        assert!(options.decompressors().get("zip").is_some());
    }
}
