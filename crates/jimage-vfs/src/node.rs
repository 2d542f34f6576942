//! Virtual tree nodes.

use std::fs::Metadata;
use std::ops::BitOr;
use std::sync::Arc;
use std::time::SystemTime;

use jimage_reader::Location;

/// Index of a node in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity flags of the synthetic root directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct NodeFlags(u8);

impl NodeFlags {
    pub const NONE: Self = Self(0);
    /// `/`
    pub const ROOT_DIR: Self = Self(0x01);
    /// `/packages`
    pub const PACKAGES_DIR: Self = Self(0x02);
    /// `/modules`
    pub const MODULES_DIR: Self = Self(0x04);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for NodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Timestamps and size of the image file, shared by every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileAttributes {
    pub size: u64,
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
}

impl From<&Metadata> for FileAttributes {
    fn from(metadata: &Metadata) -> Self {
        Self {
            size: metadata.len(),
            created: metadata.created().ok(),
            modified: metadata.modified().ok(),
            accessed: metadata.accessed().ok(),
        }
    }
}

/// A resource leaf: its location plus the decoded extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    location: Location,
    extension: String,
}

impl ResourceInfo {
    pub(crate) fn new(location: Location, extension: String) -> Self {
        Self {
            location,
            extension,
        }
    }

    #[inline]
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Size after decompression.
    #[inline]
    pub fn size(&self) -> u64 {
        self.location.uncompressed_size()
    }

    #[inline]
    pub fn compressed_size(&self) -> u64 {
        self.location.compressed_size()
    }

    #[inline]
    pub fn content_offset(&self) -> u64 {
        self.location.content_offset()
    }

    #[inline]
    pub fn extension(&self) -> &str {
        &self.extension
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Children in discovery order.
    Directory { children: Vec<NodeId> },
    Resource(ResourceInfo),
    /// Alias of another node, typically `/packages/<pkg>/<module>` to `/modules/<module>`.
    Link { target: NodeId },
}

/// A node of the virtual tree.
///
/// Values handed out by readers are snapshots; a directory snapshot taken
/// before completion does not see children discovered later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: Arc<str>,
    pub(crate) flags: NodeFlags,
    pub(crate) completed: bool,
    pub(crate) attributes: FileAttributes,
    pub(crate) kind: NodeKind,
}

impl Node {
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Full path, e.g. `/modules/java.base/java/lang/Object.class`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        match self.name.rfind('/') {
            Some(slash) if self.name.len() > 1 => &self.name[slash + 1..],
            _ => &self.name,
        }
    }

    #[inline]
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    /// Whether every child has been discovered. Always true for leaves.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    #[inline]
    pub fn attributes(&self) -> &FileAttributes {
        &self.attributes
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[inline]
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    #[inline]
    pub fn is_resource(&self) -> bool {
        matches!(self.kind, NodeKind::Resource(_))
    }

    #[inline]
    pub fn is_link(&self) -> bool {
        matches!(self.kind, NodeKind::Link { .. })
    }

    #[inline]
    pub fn is_root_dir(&self) -> bool {
        self.flags.contains(NodeFlags::ROOT_DIR)
    }

    #[inline]
    pub fn is_modules_dir(&self) -> bool {
        self.flags.contains(NodeFlags::MODULES_DIR)
    }

    #[inline]
    pub fn is_packages_dir(&self) -> bool {
        self.flags.contains(NodeFlags::PACKAGES_DIR)
    }

    /// Child ids of a directory; empty for other kinds.
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Directory { children } => children,
            _ => &[],
        }
    }

    pub fn resource(&self) -> Option<&ResourceInfo> {
        match &self.kind {
            NodeKind::Resource(info) => Some(info),
            _ => None,
        }
    }

    pub fn link_target(&self) -> Option<NodeId> {
        match self.kind {
            NodeKind::Link { target } => Some(target),
            _ => None,
        }
    }

    /// Content size of a resource, 0 otherwise.
    pub fn size(&self) -> u64 {
        self.resource().map_or(0, ResourceInfo::size)
    }

    pub fn compressed_size(&self) -> u64 {
        self.resource().map_or(0, ResourceInfo::compressed_size)
    }

    pub fn content_offset(&self) -> u64 {
        self.resource().map_or(0, ResourceInfo::content_offset)
    }

    /// Extension of a resource, if any.
    pub fn extension(&self) -> Option<&str> {
        self.resource()
            .map(ResourceInfo::extension)
            .filter(|ext| !ext.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(name: &str) -> Node {
        Node {
            id: NodeId(0),
            name: name.into(),
            flags: NodeFlags::NONE,
            completed: false,
            attributes: FileAttributes::default(),
            kind: NodeKind::Directory {
                children: Vec::new(),
            },
        }
    }

    #[test]
    fn test_file_name() {
        assert_eq!(directory("/").file_name(), "/");
        assert_eq!(directory("/modules").file_name(), "modules");
        assert_eq!(directory("/modules/java.base/java").file_name(), "java");
    }

    #[test]
    fn test_flags() {
        let flags = NodeFlags::ROOT_DIR | NodeFlags::MODULES_DIR;
        assert!(flags.contains(NodeFlags::ROOT_DIR));
        assert!(!flags.contains(NodeFlags::PACKAGES_DIR));
        assert!(NodeFlags::NONE.contains(NodeFlags::NONE));
    }
}
