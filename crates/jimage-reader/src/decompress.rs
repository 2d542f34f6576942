//! Decompression of stored resources.
//!
//! A compressed resource is a stack of one or more layers. Each layer starts
//! with a [`CompressedResourceHeader`] naming, through the string table, the
//! plugin that undoes it. Layers are peeled until the content no longer starts
//! with the header magic.

use std::borrow::Cow;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use jimage_common::{BinaryReader, Endian};

use crate::{Error, Result, StringTable};

/// Magic of a compressed layer header.
pub const COMPRESSED_MAGIC: u32 = 0xCAFE_FAFA;

/// Size of a compressed layer header in bytes.
pub const COMPRESSED_HEADER_SIZE: usize = 29;

/// Upper bound on the up-front reservation, as a multiple of the payload size.
const MAX_INFLATE_RATIO: usize = 16;

/// Access to image strings for decompression plugins.
pub trait StringProvider {
    fn string_at(&self, offset: u32) -> Result<String>;
}

impl StringProvider for StringTable<'_> {
    fn string_at(&self, offset: u32) -> Result<String> {
        self.get(offset)
    }
}

/// Header in front of each compressed layer.
///
/// ```text
/// u32 magic | u64 compressed_size | u64 uncompressed_size |
/// u32 decompressor_name_offset | u32 decompressor_config_offset | u8 is_terminal
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedResourceHeader {
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub decompressor_name_offset: u32,
    pub decompressor_config_offset: u32,
    pub is_terminal: bool,
}

impl CompressedResourceHeader {
    /// Read a header from the start of `content`, if one is there.
    pub fn read(content: &[u8], endian: Endian) -> Result<Option<Self>> {
        if content.len() < COMPRESSED_HEADER_SIZE {
            return Ok(None);
        }

        let mut reader = BinaryReader::with_endian(content, endian);
        if reader.read_u32()? != COMPRESSED_MAGIC {
            return Ok(None);
        }

        Ok(Some(Self {
            compressed_size: reader.read_u64()?,
            uncompressed_size: reader.read_u64()?,
            decompressor_name_offset: reader.read_u32()?,
            decompressor_config_offset: reader.read_u32()?,
            is_terminal: reader.read_u8()? != 0,
        }))
    }

    /// Encode the header in the given byte order.
    pub fn to_bytes(&self, endian: Endian) -> [u8; COMPRESSED_HEADER_SIZE] {
        let mut out = [0u8; COMPRESSED_HEADER_SIZE];
        endian.write_u32(&mut out[0..4], COMPRESSED_MAGIC);
        endian.write_u64(&mut out[4..12], self.compressed_size);
        endian.write_u64(&mut out[12..20], self.uncompressed_size);
        endian.write_u32(&mut out[20..24], self.decompressor_name_offset);
        endian.write_u32(&mut out[24..28], self.decompressor_config_offset);
        out[28] = self.is_terminal as u8;
        out
    }
}

/// A plugin that undoes one compression layer.
pub trait Decompressor: Send + Sync {
    /// Name the layer header refers to.
    fn name(&self) -> &str;

    /// Decompress `payload` (the layer without its header).
    fn decompress(
        &self,
        strings: &dyn StringProvider,
        header: &CompressedResourceHeader,
        payload: &[u8],
    ) -> Result<Vec<u8>>;
}

/// zlib-wrapped DEFLATE layers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipDecompressor;

impl ZipDecompressor {
    pub const NAME: &'static str = "zip";
}

impl Decompressor for ZipDecompressor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn decompress(
        &self,
        _strings: &dyn StringProvider,
        header: &CompressedResourceHeader,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let reserve = usize::try_from(header.uncompressed_size)
            .unwrap_or(usize::MAX)
            .min(payload.len().saturating_mul(MAX_INFLATE_RATIO));
        let mut output = Vec::with_capacity(reserve);
        ZlibDecoder::new(payload)
            .read_to_end(&mut output)
            .map_err(|e| Error::Decompression(e.to_string()))?;
        Ok(output)
    }
}

/// Plugins available to an image, looked up by name.
#[derive(Clone)]
pub struct DecompressorRegistry {
    plugins: Vec<Arc<dyn Decompressor>>,
}

impl DecompressorRegistry {
    /// A registry without any plugin.
    pub fn empty() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// Add a plugin; a later plugin with the same name takes precedence.
    pub fn register(&mut self, plugin: Arc<dyn Decompressor>) {
        self.plugins.push(plugin);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Decompressor>> {
        self.plugins.iter().rev().find(|p| p.name() == name)
    }
}

impl Default for DecompressorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ZipDecompressor));
        registry
    }
}

impl fmt::Debug for DecompressorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}

/// Peel every compression layer off `content`.
pub fn decompress_resource(
    endian: Endian,
    strings: &dyn StringProvider,
    content: &[u8],
    registry: &DecompressorRegistry,
) -> Result<Vec<u8>> {
    let mut content = Cow::Borrowed(content);

    while let Some(header) = CompressedResourceHeader::read(&content, endian)? {
        let name = strings.string_at(header.decompressor_name_offset)?;
        let plugin = registry
            .get(&name)
            .ok_or_else(|| Error::UnknownDecompressor(name.clone()))?;

        let payload = &content[COMPRESSED_HEADER_SIZE..];
        let output = plugin.decompress(strings, &header, payload)?;
        if output.len() as u64 != header.uncompressed_size {
            return Err(Error::Decompression(format!(
                "{name} produced {} bytes, expected {}",
                output.len(),
                header.uncompressed_size
            )));
        }

        tracing::trace!(plugin = %name, size = output.len(), "decompressed layer");
        content = Cow::Owned(output);
    }

    Ok(content.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    // "" zip
    const STRINGS: &[u8] = b"\0zip\0";

    fn zip_layer(original: &[u8], endian: Endian) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(original).unwrap();
        let payload = encoder.finish().unwrap();

        let header = CompressedResourceHeader {
            compressed_size: payload.len() as u64,
            uncompressed_size: original.len() as u64,
            decompressor_name_offset: 1,
            decompressor_config_offset: 0,
            is_terminal: true,
        };
        let mut out = header.to_bytes(endian).to_vec();
        out.extend_from_slice(&payload);
        out
    }

    #[test]
    fn test_zip_layer() {
        let original = b"Hello, World! This is a test of zlib compression.";
        let stored = zip_layer(original, Endian::Big);
        let strings = StringTable::new(STRINGS);

        let out =
            decompress_resource(Endian::Big, &strings, &stored, &DecompressorRegistry::default())
                .unwrap();
        assert_eq!(out, original);
    }

    #[test]
    fn test_stacked_layers() {
        let original = vec![7u8; 4096];
        let inner = zip_layer(&original, Endian::Little);
        let outer = zip_layer(&inner, Endian::Little);
        let strings = StringTable::new(STRINGS);

        let out = decompress_resource(
            Endian::Little,
            &strings,
            &outer,
            &DecompressorRegistry::default(),
        )
        .unwrap();
        assert_eq!(out, original);
    }

    #[test]
    fn test_plain_content_passes_through() {
        let strings = StringTable::new(STRINGS);
        let out = decompress_resource(
            Endian::Little,
            &strings,
            b"plain",
            &DecompressorRegistry::default(),
        )
        .unwrap();
        assert_eq!(out, b"plain");
    }

    #[test]
    fn test_unknown_plugin() {
        let stored = zip_layer(b"abc", Endian::Little);
        let strings = StringTable::new(STRINGS);
        assert!(matches!(
            decompress_resource(Endian::Little, &strings, &stored, &DecompressorRegistry::empty()),
            Err(Error::UnknownDecompressor(name)) if name == "zip"
        ));
    }

    #[test]
    fn test_corrupt_uncompressed_size() {
        let mut stored = zip_layer(b"abc", Endian::Big);
        // uncompressed_size sits after magic and compressed_size
        stored[12..20].copy_from_slice(&u64::MAX.to_be_bytes());
        let strings = StringTable::new(STRINGS);

        assert!(matches!(
            decompress_resource(Endian::Big, &strings, &stored, &DecompressorRegistry::default()),
            Err(Error::Decompression(_))
        ));
    }

    #[test]
    fn test_header_round_trip() {
        let header = CompressedResourceHeader {
            compressed_size: 10,
            uncompressed_size: 20,
            decompressor_name_offset: 3,
            decompressor_config_offset: 4,
            is_terminal: false,
        };
        let bytes = header.to_bytes(Endian::Big);
        assert_eq!(
            CompressedResourceHeader::read(&bytes, Endian::Big).unwrap(),
            Some(header)
        );
        assert_eq!(CompressedResourceHeader::read(&bytes, Endian::Little).unwrap(), None);
    }
}
