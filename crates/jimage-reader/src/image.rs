//! Image file reader.
//!
//! - Header validation and region arithmetic over a memory mapping
//! - Perfect-hash name lookup with in-place verification
//! - Content reads from the mapping or through pooled read buffers

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use jimage_common::{hash, Endian};
use memmap2::{Mmap, MmapOptions};

use crate::buffer_cache;
use crate::decompress::{self, DecompressorRegistry};
use crate::{
    attributes, AccessStrategy, Error, ImageHeader, ImageOptions, Location, Result, StringTable,
    HEADER_SIZE,
};

/// Where the bytes come from.
enum Backing {
    /// The whole file is mapped.
    Mapped(Mmap),
    /// Only the index is mapped; content is read from the file.
    Channel { index: Mmap, file: File },
}

/// An opened image.
///
/// All index views are computed from the header as `(start, len)` ranges of
/// one immutable mapping, so the reader can be shared across threads freely.
pub struct ImageFile {
    backing: Backing,
    path: PathBuf,
    name: String,
    endian: Endian,
    header: ImageHeader,
    file_len: u64,
    access: AccessStrategy,
    decompressors: DecompressorRegistry,
    lookups: AtomicU64,
}

impl ImageFile {
    /// Open an image written in the native byte order.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ImageOptions::default())
    }

    /// Open an image with explicit options.
    pub fn open_with<P: AsRef<Path>>(path: P, options: ImageOptions) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        if file_len < HEADER_SIZE as u64 {
            return Err(Error::NotAnImage { name });
        }

        let mut raw = [0u8; HEADER_SIZE];
        file.read_exact(&mut raw)?;
        let endian = options.endian();
        let header = ImageHeader::parse(&raw, endian, &name)?;

        let index_size = header.index_size();
        if index_size as u64 > file_len {
            tracing::warn!(path = %name, index_size, file_len, "index larger than file");
            return Err(Error::NotAnImage { name });
        }

        let access = options.access().resolve();
        let backing = match access {
            AccessStrategy::IndexOnly => {
                // SAFETY: the image is opened read-only and treated as immutable.
                let index = unsafe { MmapOptions::new().len(index_size).map(&file)? };
                Backing::Channel { index, file }
            }
            _ => {
                // SAFETY: as above.
                let mmap = unsafe { Mmap::map(&file)? };
                Backing::Mapped(mmap)
            }
        };

        tracing::debug!(
            path = %name,
            ?endian,
            ?access,
            resources = header.resource_count,
            table_length = header.table_length,
            index_size,
            "opened image"
        );

        Ok(Self {
            backing,
            path: path.to_path_buf(),
            name,
            endian,
            header,
            file_len,
            access,
            decompressors: options.decompressors().clone(),
            lookups: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    #[inline]
    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    /// Size of header plus index; content offsets are relative to this.
    #[inline]
    pub fn index_size(&self) -> usize {
        self.header.index_size()
    }

    /// The strategy in effect (never `Auto`).
    #[inline]
    pub fn access(&self) -> AccessStrategy {
        self.access
    }

    #[inline]
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Number of index lookups performed so far.
    #[inline]
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    #[inline]
    fn index(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(mmap) => &mmap[..self.index_size()],
            Backing::Channel { index, .. } => index,
        }
    }

    #[inline]
    fn region(&self, start: usize, len: usize) -> &[u8] {
        &self.index()[start..start + len]
    }

    /// The locations region.
    #[inline]
    pub fn locations_bytes(&self) -> &[u8] {
        self.region(self.header.locations_offset(), self.header.locations_size as usize)
    }

    /// The strings region.
    #[inline]
    pub fn strings(&self) -> StringTable<'_> {
        StringTable::new(
            self.region(self.header.strings_offset(), self.header.strings_size as usize),
        )
    }

    #[inline]
    fn redirect(&self, slot: usize) -> i32 {
        let start = self.header.redirect_offset() + slot * 4;
        self.endian.read_i32(&self.index()[start..start + 4])
    }

    #[inline]
    fn offset(&self, index: usize) -> u32 {
        let start = self.header.offsets_offset() + index * 4;
        self.endian.read_u32(&self.index()[start..start + 4])
    }

    /// Resolve a hash through the redirect table to a location index.
    fn resolve<F>(&self, hash: u32, rehash: F) -> Option<usize>
    where
        F: FnOnce(u32) -> u32,
    {
        let count = self.header.table_length;
        if count == 0 {
            return None;
        }

        let value = self.redirect((hash % count) as usize);
        match value {
            0 => None,
            v if v < 0 => Some((-(v as i64) - 1) as usize),
            seed => Some((rehash(seed as u32) % count) as usize),
        }
    }

    /// Location index `name` hashes to, before verification.
    pub fn location_index(&self, name: &str) -> Option<usize> {
        self.resolve(hash::hash(name), |seed| hash::hash_with_seed(name, seed))
    }

    /// Location index of `name` inside `module`, before verification.
    pub fn location_index_in(&self, module: &str, name: &str) -> Option<usize> {
        self.resolve(
            hash::hash_module_name(module, name, hash::HASH_MULTIPLIER),
            |seed| hash::hash_module_name(module, name, seed),
        )
    }

    /// Byte offset into the locations region of the record at `index`.
    fn record_offset(&self, index: usize) -> Result<usize> {
        if index >= self.header.table_length as usize {
            return Err(Error::CorruptIndex(format!(
                "location index {index} outside table of {}",
                self.header.table_length
            )));
        }
        Ok(self.offset(index) as usize)
    }

    /// Find the location of a full name such as `/java.base/java/lang/Object.class`.
    pub fn find_location(&self, name: &str) -> Result<Option<Location>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let Some(index) = self.location_index(name) else {
            return Ok(None);
        };
        let location = self.location_at(index)?;
        Ok((!location.is_empty() && location.verify(name, &self.strings())).then_some(location))
    }

    /// Find the location of `name` inside `module`.
    pub fn find_location_in(&self, module: &str, name: &str) -> Result<Option<Location>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let Some(index) = self.location_index_in(module, name) else {
            return Ok(None);
        };
        let location = self.location_at(index)?;
        Ok((!location.is_empty() && location.verify_module_name(module, name, &self.strings()))
            .then_some(location))
    }

    /// Whether `name` exists inside `module`, without decoding the record.
    pub fn contains_resource(&self, module: &str, name: &str) -> Result<bool> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let Some(index) = self.location_index_in(module, name) else {
            return Ok(false);
        };
        let offset = self.record_offset(index)?;
        attributes::verify_raw(module, name, self.locations_bytes(), offset, &self.strings())
    }

    /// Decode the record at a byte offset into the locations region.
    pub fn get_location(&self, offset: u32) -> Result<Location> {
        Location::decode(self.locations_bytes(), offset as usize)
    }

    /// Decode the record at a location index.
    pub fn location_at(&self, index: usize) -> Result<Location> {
        let offset = self.record_offset(index)?;
        Location::decode(self.locations_bytes(), offset)
    }

    /// Every location, in offsets-table order, skipping spare table slots.
    pub fn locations(&self) -> impl Iterator<Item = Result<Location>> + '_ {
        (0..self.header.table_length as usize)
            .map(move |index| self.location_at(index))
            .filter(|location| !matches!(location, Ok(location) if location.is_empty()))
    }

    /// Full names of every location, in offsets-table order.
    pub fn entry_names(&self) -> Result<Vec<String>> {
        let strings = self.strings();
        self.locations()
            .map(|location| location?.full_name(&strings, false))
            .collect()
    }

    /// Names of the modules in the image.
    ///
    /// Taken from the `/modules` listing when present, otherwise collected
    /// from the module attribute of every location.
    pub fn module_names(&self) -> Result<Vec<String>> {
        let strings = self.strings();

        if let Some(modules) = self.find_location("/modules")? {
            let mut names = Vec::new();
            for offset in self.read_offsets(&modules)? {
                names.push(self.get_location(offset)?.base_ext(&strings)?);
            }
            return Ok(names);
        }

        let mut names = BTreeSet::new();
        for location in self.locations() {
            let location = location?;
            if location.module_offset() == 0 {
                continue;
            }
            let module = location.module(&strings)?;
            if module != "modules" && module != "packages" {
                names.insert(module);
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Read a listing resource as a sequence of `u32` values in image order.
    pub fn read_offsets(&self, location: &Location) -> Result<Vec<u32>> {
        let bytes = self.read(location)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| self.endian.read_u32(chunk))
            .collect())
    }

    /// Stored bytes of `size` at content offset `offset`.
    fn content(&self, offset: u64, size: u64) -> Result<Cow<'_, [u8]>> {
        let start = offset
            .checked_add(self.index_size() as u64)
            .ok_or(Error::OutOfBounds { offset, size })?;
        let end = start
            .checked_add(size)
            .filter(|&end| end <= self.file_len)
            .ok_or(Error::OutOfBounds { offset: start, size })?;

        match &self.backing {
            Backing::Mapped(mmap) => Ok(Cow::Borrowed(&mmap[start as usize..end as usize])),
            Backing::Channel { file, .. } => {
                let size = size as usize;
                if size > buffer_cache::LARGE_BUFFER {
                    let mut bytes = vec![0u8; size];
                    read_fully(file, &mut bytes, start)?;
                    return Ok(Cow::Owned(bytes));
                }

                let mut buffer = buffer_cache::acquire(size);
                let result = read_fully(file, buffer.as_mut_slice(), start);
                let bytes = result.map(|()| buffer.as_slice().to_vec());
                buffer_cache::release(buffer);
                Ok(Cow::Owned(bytes?))
            }
        }
    }

    /// Read and, when needed, decompress the content of a location.
    pub fn read(&self, location: &Location) -> Result<Vec<u8>> {
        let offset = location.content_offset();

        if !location.is_compressed() {
            return Ok(self.content(offset, location.uncompressed_size())?.into_owned());
        }

        let stored = self.content(offset, location.compressed_size())?;
        let bytes = decompress::decompress_resource(
            self.endian,
            &self.strings(),
            &stored,
            &self.decompressors,
        )?;

        if bytes.len() as u64 != location.uncompressed_size() {
            return Err(Error::Decompression(format!(
                "expected {} bytes, got {}",
                location.uncompressed_size(),
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Read uncompressed content into `buf`, returning the number of bytes written.
    ///
    /// `buf` must hold at least `uncompressed_size` bytes.
    pub fn read_to_buffer(&self, location: &Location, buf: &mut [u8]) -> Result<usize> {
        let size = location.uncompressed_size() as usize;
        if buf.len() < size {
            return Err(Error::ShortRead {
                read: buf.len(),
                expected: size,
            });
        }

        if location.is_compressed() {
            let bytes = self.read(location)?;
            buf[..size].copy_from_slice(&bytes);
        } else {
            let bytes = self.content(location.content_offset(), size as u64)?;
            buf[..size].copy_from_slice(&bytes);
        }
        Ok(size)
    }

    /// Look up a full name and read its content.
    pub fn read_resource(&self, name: &str) -> Result<Vec<u8>> {
        let location = self
            .find_location(name)?
            .ok_or_else(|| Error::ResourceNotFound(name.to_string()))?;
        self.read(&location)
    }

    /// Read many locations in parallel.
    #[cfg(feature = "parallel")]
    pub fn read_parallel(&self, locations: &[Location]) -> Vec<Result<Vec<u8>>> {
        use rayon::prelude::*;

        locations.par_iter().map(|location| self.read(location)).collect()
    }
}

/// Positioned read that fills `buf` or fails with [`Error::ShortRead`].
fn read_fully(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    let expected = buf.len();
    let mut read = 0;

    while read < expected {
        let n = read_at(file, &mut buf[read..], offset + read as u64)?;
        if n == 0 {
            return Err(Error::ShortRead { read, expected });
        }
        read += n;
    }
    Ok(())
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

impl std::fmt::Debug for ImageFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageFile")
            .field("name", &self.name)
            .field("endian", &self.endian)
            .field("access", &self.access)
            .field("resources", &self.header.resource_count)
            .field("decompressors", &self.decompressors)
            .finish()
    }
}
