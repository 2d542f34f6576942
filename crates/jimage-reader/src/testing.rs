//! Deterministic image builder for tests.
//!
//! Produces well-formed images: a perfect-hash table using both direct and
//! seeded buckets, attribute records, a deduplicated string table and
//! content. With [`ImageBuilder::add_module_tree`] it also emits the
//! `/modules` and `/packages` listing resources the virtual tree reads.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{self, Write};
use std::path::Path;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use jimage_common::{hash, mutf8, Endian};

use crate::attributes::{self, AttributeKind, ATTRIBUTE_COUNT};
use crate::decompress::{CompressedResourceHeader, ZipDecompressor, COMPRESSED_HEADER_SIZE};
use crate::ImageHeader;

/// Seeds tried per bucket before the table grows.
const MAX_SEED: u32 = 1 << 16;

enum Content {
    Raw(Vec<u8>),
    /// One compression layer: plugin name, payload, size after decompression.
    Layer {
        plugin: String,
        payload: Vec<u8>,
        uncompressed: u64,
    },
    /// Record offsets of the named locations.
    Listing(Vec<String>),
    /// `(is_empty, module name offset)` pairs.
    Owners(Vec<String>),
}

impl Content {
    fn stored_size(&self) -> usize {
        match self {
            Self::Raw(bytes) => bytes.len(),
            Self::Layer { payload, .. } => COMPRESSED_HEADER_SIZE + payload.len(),
            Self::Listing(names) => names.len() * 4,
            Self::Owners(modules) => modules.len() * 8,
        }
    }
}

struct Entry {
    name: String,
    content: Content,
}

/// The four string parts of a location name.
#[derive(Debug, Default, PartialEq, Eq)]
struct NameParts<'a> {
    module: &'a str,
    parent: &'a str,
    base: &'a str,
    extension: &'a str,
}

/// Split a full name the way the image writer does.
///
/// `/modules/x` and `/packages/x` keep `x` whole as the base.
fn split_name(full: &str) -> NameParts<'_> {
    for prefix in ["modules", "packages"] {
        if let Some(rest) = full
            .strip_prefix('/')
            .and_then(|s| s.strip_prefix(prefix))
            .and_then(|s| s.strip_prefix('/'))
        {
            return NameParts {
                module: prefix,
                base: rest,
                ..Default::default()
            };
        }
    }

    let mut parts = NameParts::default();
    let mut rest = full;

    if full.len() >= 2 && full.starts_with('/') {
        if let Some(end) = full[1..].find('/') {
            parts.module = &full[1..end + 1];
            rest = &full[end + 2..];
        }
    }

    if let Some(slash) = rest.rfind('/').filter(|&i| i > 1) {
        parts.parent = &rest[..slash];
        rest = &rest[slash + 1..];
    }

    match rest.rfind('.') {
        Some(dot) => {
            parts.base = &rest[..dot];
            parts.extension = &rest[dot + 1..];
        }
        None => parts.base = rest,
    }
    parts
}

#[derive(Default)]
struct Strings {
    bytes: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl Strings {
    fn new() -> Self {
        let mut strings = Self::default();
        strings.add("");
        strings
    }

    fn add(&mut self, text: &str) -> u32 {
        if let Some(&offset) = self.offsets.get(text) {
            return offset;
        }
        let offset = self.bytes.len() as u32;
        self.bytes.extend(mutf8::encode(text));
        self.bytes.push(0);
        self.offsets.insert(text.to_string(), offset);
        offset
    }
}

/// Builds image bytes in memory.
pub struct ImageBuilder {
    endian: Endian,
    entries: Vec<Entry>,
    module_tree: bool,
}

impl ImageBuilder {
    pub fn new(endian: Endian) -> Self {
        Self {
            endian,
            entries: Vec::new(),
            module_tree: false,
        }
    }

    /// Add an uncompressed resource under its full name.
    pub fn add_resource(&mut self, name: &str, content: &[u8]) -> &mut Self {
        self.push(name, Content::Raw(content.to_vec()))
    }

    /// Add a resource stored as one layer for `plugin`.
    pub fn add_compressed_resource(
        &mut self,
        name: &str,
        plugin: &str,
        payload: &[u8],
        uncompressed: u64,
    ) -> &mut Self {
        self.push(
            name,
            Content::Layer {
                plugin: plugin.to_string(),
                payload: payload.to_vec(),
                uncompressed,
            },
        )
    }

    /// Add a resource compressed with zlib for the built-in `zip` plugin.
    pub fn add_zip_resource(&mut self, name: &str, content: &[u8]) -> &mut Self {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        // Writing into a Vec cannot fail.
        let payload = encoder
            .write_all(content)
            .and_then(|()| encoder.finish())
            .unwrap_or_default();
        self.add_compressed_resource(name, ZipDecompressor::NAME, &payload, content.len() as u64)
    }

    /// Add a listing resource whose content is the record offsets of `children`.
    pub fn add_listing(&mut self, name: &str, children: &[&str]) -> &mut Self {
        let children = children.iter().map(|c| c.to_string()).collect();
        self.push(name, Content::Listing(children))
    }

    /// Add `/packages/<package>` owned by the given modules.
    pub fn add_package(&mut self, package: &str, modules: &[&str]) -> &mut Self {
        let modules = modules.iter().map(|m| m.to_string()).collect();
        self.push(&format!("/packages/{package}"), Content::Owners(modules))
    }

    /// Add an empty `/packages/<package>/<module>` location.
    pub fn add_package_link(&mut self, package: &str, module: &str) -> &mut Self {
        self.push(
            &format!("/packages/{package}/{module}"),
            Content::Raw(Vec::new()),
        )
    }

    /// Generate `/modules` and `/packages` listings for every resource at build time.
    pub fn add_module_tree(&mut self) -> &mut Self {
        self.module_tree = true;
        self
    }

    fn push(&mut self, name: &str, content: Content) -> &mut Self {
        self.entries.push(Entry {
            name: name.to_string(),
            content,
        });
        self
    }

    /// Listing entries derived from the resources added so far.
    fn tree_entries(&self) -> Vec<Entry> {
        let existing: BTreeSet<&str> = self.entries.iter().map(|e| e.name.as_str()).collect();
        let mut dirs: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut packages: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for entry in &self.entries {
            let parts = split_name(&entry.name);
            if parts.module.is_empty() || parts.module == "modules" || parts.module == "packages" {
                continue;
            }

            let module_dir = format!("/modules/{}", parts.module);
            dirs.entry("/modules".into()).or_default().insert(module_dir.clone());

            let mut dir = module_dir;
            if !parts.parent.is_empty() {
                for segment in parts.parent.split('/') {
                    let child = format!("{dir}/{segment}");
                    dirs.entry(dir).or_default().insert(child.clone());
                    dir = child;
                }
                packages
                    .entry(parts.parent.replace('/', "."))
                    .or_default()
                    .insert(parts.module.to_string());
            }
            dirs.entry(dir).or_default().insert(entry.name.clone());
        }

        let mut entries = Vec::new();
        for (dir, children) in dirs {
            if !existing.contains(dir.as_str()) {
                entries.push(Entry {
                    name: dir,
                    content: Content::Listing(children.into_iter().collect()),
                });
            }
        }

        if !packages.is_empty() && !existing.contains("/packages") {
            entries.push(Entry {
                name: "/packages".into(),
                content: Content::Listing(packages.keys().map(|p| format!("/packages/{p}")).collect()),
            });
        }
        for (package, modules) in packages {
            let name = format!("/packages/{package}");
            if !existing.contains(name.as_str()) {
                entries.push(Entry {
                    name,
                    content: Content::Owners(modules.into_iter().collect()),
                });
            }
        }
        entries
    }

    /// Serialize the image.
    pub fn build(&self) -> io::Result<Vec<u8>> {
        let generated = if self.module_tree {
            self.tree_entries()
        } else {
            Vec::new()
        };
        let entries: Vec<&Entry> = self.entries.iter().chain(&generated).collect();

        if entries.is_empty() {
            return Err(invalid("an image needs at least one resource"));
        }
        let mut seen = BTreeSet::new();
        for entry in &entries {
            if !seen.insert(entry.name.as_str()) {
                return Err(invalid(&format!("duplicate resource {}", entry.name)));
            }
        }

        let endian = self.endian;
        let mut strings = Strings::new();

        // Lay out content first so records know their offsets.
        let mut content_offsets = Vec::with_capacity(entries.len());
        let mut content_size = 0u64;
        for entry in &entries {
            content_offsets.push(content_size);
            content_size += entry.content.stored_size() as u64;
        }

        let mut locations = Vec::new();
        let mut record_offsets = HashMap::with_capacity(entries.len());
        for (entry, &offset) in entries.iter().zip(&content_offsets) {
            let parts = split_name(&entry.name);
            let mut attrs = [0u64; ATTRIBUTE_COUNT];
            attrs[AttributeKind::Module as usize] = strings.add(parts.module) as u64;
            attrs[AttributeKind::Parent as usize] = strings.add(parts.parent) as u64;
            attrs[AttributeKind::Base as usize] = strings.add(parts.base) as u64;
            attrs[AttributeKind::Extension as usize] = strings.add(parts.extension) as u64;
            attrs[AttributeKind::Offset as usize] = offset;

            let stored = entry.content.stored_size() as u64;
            match &entry.content {
                Content::Layer { uncompressed, .. } => {
                    attrs[AttributeKind::Compressed as usize] = stored;
                    attrs[AttributeKind::Uncompressed as usize] = *uncompressed;
                }
                _ => attrs[AttributeKind::Uncompressed as usize] = stored,
            }

            record_offsets.insert(entry.name.as_str(), locations.len() as u32);
            locations.extend(attributes::compress(&attrs));
        }

        let mut content = Vec::with_capacity(content_size as usize);
        for entry in &entries {
            match &entry.content {
                Content::Raw(bytes) => content.extend_from_slice(bytes),
                Content::Layer {
                    plugin,
                    payload,
                    uncompressed,
                } => {
                    let header = CompressedResourceHeader {
                        compressed_size: payload.len() as u64,
                        uncompressed_size: *uncompressed,
                        decompressor_name_offset: strings.add(plugin),
                        decompressor_config_offset: 0,
                        is_terminal: true,
                    };
                    content.extend_from_slice(&header.to_bytes(endian));
                    content.extend_from_slice(payload);
                }
                Content::Listing(children) => {
                    for child in children {
                        let offset = record_offsets.get(child.as_str()).ok_or_else(|| {
                            invalid(&format!("{} lists unknown location {child}", entry.name))
                        })?;
                        push_u32(&mut content, endian, *offset);
                    }
                }
                Content::Owners(modules) => {
                    for module in modules {
                        push_u32(&mut content, endian, 0);
                        push_u32(&mut content, endian, strings.add(module));
                    }
                }
            }
        }

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        let (redirect, order) = perfect_hash(&names)?;

        // Spare slots point at an empty record.
        let spare = locations.len() as u32;
        if order.iter().any(Option::is_none) {
            locations.push(0);
        }

        let header = ImageHeader::new(
            names.len() as u32,
            redirect.len() as u32,
            locations.len() as u32,
            strings.bytes.len() as u32,
        );

        let mut out = Vec::with_capacity(header.index_size() + content.len());
        out.extend_from_slice(&header.to_bytes(endian));
        for value in redirect {
            let mut word = [0u8; 4];
            endian.write_i32(&mut word, value);
            out.extend_from_slice(&word);
        }
        for slot in order {
            let offset = slot.map_or(spare, |entry| record_offsets[names[entry]]);
            push_u32(&mut out, endian, offset);
        }
        out.extend_from_slice(&locations);
        out.extend_from_slice(&strings.bytes);
        out.extend_from_slice(&content);
        Ok(out)
    }

    /// Build and write to `path`.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        std::fs::write(path, self.build()?)
    }
}

fn push_u32(out: &mut Vec<u8>, endian: Endian, value: u32) {
    let mut word = [0u8; 4];
    endian.write_u32(&mut word, value);
    out.extend_from_slice(&word);
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.to_string())
}

/// Compute the redirect table and, per location index, the entry stored there.
///
/// The table starts with one slot per name. Buckets are placed largest first:
/// multi-entry buckets search for a seed that scatters them onto free slots,
/// singletons take the next free slot directly. When some bucket cannot be
/// scattered the table grows to the next odd length and placement restarts;
/// an even length leaves `hash % length` tied to the parity of the name bytes.
fn perfect_hash(names: &[&str]) -> io::Result<(Vec<i32>, Vec<Option<usize>>)> {
    let limit = names.len() * 4 + 8;
    let mut length = names.len();
    while length <= limit {
        if let Some(table) = place(names, length) {
            return Ok(table);
        }
        length = (length + 1) | 1;
    }
    Err(invalid("no perfect hash seed found"))
}

/// Try to place every name in a table of `length` slots.
fn place(names: &[&str], length: usize) -> Option<(Vec<i32>, Vec<Option<usize>>)> {
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); length];
    for (entry, name) in names.iter().enumerate() {
        buckets[hash::hash(name) as usize % length].push(entry);
    }

    let mut by_size: Vec<usize> = (0..length).filter(|&b| !buckets[b].is_empty()).collect();
    by_size.sort_by(|&a, &b| buckets[b].len().cmp(&buckets[a].len()).then(a.cmp(&b)));

    let mut redirect = vec![0i32; length];
    let mut slots: Vec<Option<usize>> = vec![None; length];
    let mut next_free = 0;

    for bucket in by_size {
        let members = &buckets[bucket];

        if members.len() == 1 {
            while slots[next_free].is_some() {
                next_free += 1;
            }
            slots[next_free] = Some(members[0]);
            redirect[bucket] = -(next_free as i32) - 1;
            continue;
        }

        let seed = (1..MAX_SEED).find(|&seed| {
            let targets: BTreeSet<usize> = members
                .iter()
                .map(|&m| hash::hash_with_seed(names[m], seed) as usize % length)
                .collect();
            targets.len() == members.len() && targets.iter().all(|&t| slots[t].is_none())
        })?;

        for &member in members {
            slots[hash::hash_with_seed(names[member], seed) as usize % length] = Some(member);
        }
        redirect[bucket] = seed as i32;
    }

    Some((redirect, slots))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_name() {
        assert_eq!(
            split_name("/java.base/java/lang/Object.class"),
            NameParts {
                module: "java.base",
                parent: "java/lang",
                base: "Object",
                extension: "class"
            }
        );
        assert_eq!(
            split_name("/modules/java.base/java"),
            NameParts {
                module: "modules",
                base: "java.base/java",
                ..Default::default()
            }
        );
        assert_eq!(
            split_name("/packages/java.lang"),
            NameParts {
                module: "packages",
                base: "java.lang",
                ..Default::default()
            }
        );
        assert_eq!(
            split_name("/modules"),
            NameParts {
                base: "/modules",
                ..Default::default()
            }
        );
        assert_eq!(split_name("Foo").base, "Foo");
    }

    #[test]
    fn test_perfect_hash_uses_both_bucket_kinds() {
        let owned: Vec<String> = (0..500).map(|i| format!("/m/pkg/R{i}.class")).collect();
        let names: Vec<&str> = owned.iter().map(String::as_str).collect();
        let (redirect, order) = perfect_hash(&names).unwrap();

        assert!(redirect.iter().any(|&r| r < 0));
        assert!(redirect.iter().any(|&r| r > 0));

        let mut seen: Vec<usize> = order.iter().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..names.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_two_names_with_equal_parity() {
        // Both names hash to the same slot of a two-slot table under every seed.
        let names = ["/m/p/Z.class", "/m/p/Plain.class"];
        let (redirect, order) = perfect_hash(&names).unwrap();

        assert!(redirect.len() > names.len());
        assert_eq!(redirect.len() % 2, 1);
        assert_eq!(order.len(), redirect.len());
        let mut seen: Vec<usize> = order.iter().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, [0, 1]);
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        assert!(ImageBuilder::new(Endian::Little).build().is_err());

        let mut builder = ImageBuilder::new(Endian::Little);
        builder.add_resource("/m/a.txt", b"1").add_resource("/m/a.txt", b"2");
        assert!(builder.build().is_err());
    }
}
