//! Lazy construction of the virtual tree.
//!
//! The tree is an arena of [`Node`]s plus a path map. Every cached path moves
//! through three states: absent (no entry), materializing (directory created
//! but its listing not yet walked) and completed. Leaves are completed on
//! creation. A completed directory never gains children.
//!
//! Layout of the synthesized tree:
//!
//! ```text
//! /
//! ├── modules/<module>/<package path>/<resource>
//! └── packages/<package>/<module>   (links into /modules/<module>)
//! ```
//!
//! All methods take `&mut self`; the owner serializes access with one lock,
//! so no two threads can build the same subtree.

use std::hash::BuildHasherDefault;
use std::sync::Arc;

use hashbrown::HashMap as FastHashMap;
use jimage_reader::{ImageFile, Location};
use rustc_hash::FxHasher;

use crate::node::{FileAttributes, Node, NodeFlags, NodeId, NodeKind, ResourceInfo};
use crate::{Error, Result};

type FxHashMap<K, V> = FastHashMap<K, V, BuildHasherDefault<FxHasher>>;

const MODULES: &str = "/modules";
const PACKAGES: &str = "/packages";

pub(crate) struct Tree {
    nodes: Vec<Node>,
    paths: FxHashMap<Arc<str>, NodeId>,
    root: NodeId,
    modules: NodeId,
    packages: NodeId,
    attributes: FileAttributes,
}

impl Tree {
    /// A tree holding only the three synthetic roots; `/` starts completed.
    pub(crate) fn new(attributes: FileAttributes) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            paths: FxHashMap::default(),
            root: NodeId(0),
            modules: NodeId(0),
            packages: NodeId(0),
            attributes,
        };

        let root = tree.push(None, "/", NodeFlags::ROOT_DIR, false, empty_directory());
        tree.modules = tree.push(Some(root), MODULES, NodeFlags::MODULES_DIR, false, empty_directory());
        tree.packages =
            tree.push(Some(root), PACKAGES, NodeFlags::PACKAGES_DIR, false, empty_directory());
        tree.nodes[root.index()].completed = true;
        tree.root = root;
        tree
    }

    /// Drop every materialized node, keeping the synthetic roots.
    pub(crate) fn clear(&mut self) {
        *self = Self::new(self.attributes);
    }

    #[inline]
    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.index()).ok_or(Error::UnknownNode(id.0))
    }

    /// The cached node at `path`, whatever its state.
    pub(crate) fn cached(&self, path: &str) -> Option<NodeId> {
        self.paths.get(path).copied()
    }

    /// Follow a link; with `recursive`, follow one more hop if the target is a link too.
    pub(crate) fn resolve_link(&self, id: NodeId, recursive: bool) -> Result<NodeId> {
        let Some(target) = self.node(id)?.link_target() else {
            return Ok(id);
        };
        if recursive {
            if let Some(next) = self.node(target)?.link_target() {
                return Ok(next);
            }
        }
        Ok(target)
    }

    /// Find or materialize the node at `path`.
    pub(crate) fn find(&mut self, image: &ImageFile, path: &str) -> Result<Option<NodeId>> {
        if let Some(id) = self.cached(path) {
            if self.nodes[id.index()].completed {
                return Ok(Some(id));
            }
        }

        let built = self.build_node(image, path)?;
        Ok(built.or_else(|| self.cached(path)))
    }

    fn build_node(&mut self, image: &ImageFile, name: &str) -> Result<Option<NodeId>> {
        let is_packages = name.starts_with(PACKAGES);
        let is_modules = !is_packages && name.starts_with(MODULES);
        if !is_packages && !is_modules {
            return Ok(None);
        }

        match image.find_location(name)? {
            Some(location) if is_packages => self.handle_packages(image, name, &location),
            Some(location) => self.handle_modules_subtree(image, name, &location).map(Some),
            None if is_modules => self.handle_resource(image, name),
            None => self.handle_module_link(image, name),
        }
    }

    /// `/packages`, `/packages/<pkg>` or an empty `/packages/<pkg>/<module>` location.
    fn handle_packages(
        &mut self,
        image: &ImageFile,
        name: &str,
        location: &Location,
    ) -> Result<Option<NodeId>> {
        let strings = image.strings();

        if name == PACKAGES {
            for offset in image.read_offsets(location)? {
                let child = image.get_location(offset)?;
                self.find(image, &child.full_name(&strings, false)?)?;
            }
            self.complete(self.packages);
            return Ok(Some(self.packages));
        }

        let base = location.base_ext(&strings)?;

        if location.uncompressed_size() != 0 {
            // (is_empty, module name offset) pairs
            let dir = self.make_directory(&format!("{PACKAGES}/{base}"), self.packages);
            let content = image.read(location)?;
            for pair in content.chunks_exact(8) {
                let module = strings.get(image.endian().read_u32(&pair[4..]))?;
                self.link_module(image, dir, &module)?;
            }
            self.complete(dir);
            return Ok(Some(dir));
        }

        // Single owner stored as /packages/<pkg>/<module>.
        let Some((package, module)) = base.split_once('/') else {
            return Ok(None);
        };
        let dir = self.make_directory(&format!("{PACKAGES}/{package}"), self.packages);
        self.link_module(image, dir, module)
    }

    /// Link `<dir>/<module>` to `/modules/<module>` when that module exists.
    fn link_module(&mut self, image: &ImageFile, dir: NodeId, module: &str) -> Result<Option<NodeId>> {
        let Some(target) = self.find(image, &format!("{MODULES}/{module}"))? else {
            return Ok(None);
        };

        let name = format!("{}/{module}", self.nodes[dir.index()].name);
        if let Some(existing) = self.cached(&name) {
            return Ok(Some(existing));
        }
        if self.nodes[dir.index()].completed {
            tracing::warn!(link = %name, "package directory already completed, link dropped");
            return Ok(None);
        }

        let link = self.push(Some(dir), &name, NodeFlags::NONE, true, NodeKind::Link { target });
        Ok(Some(link))
    }

    /// A `/modules/...` location whose content lists child locations.
    fn handle_modules_subtree(
        &mut self,
        image: &ImageFile,
        name: &str,
        location: &Location,
    ) -> Result<NodeId> {
        let strings = image.strings();
        let dir = self.make_directories(name);
        if self.nodes[dir.index()].completed {
            return Ok(dir);
        }

        for offset in image.read_offsets(location)? {
            let child = image.get_location(offset)?;
            let path = child.full_name(&strings, false)?;

            if path.starts_with(MODULES) {
                // package directory
                self.make_directories(&path);
            } else {
                let parent = self.make_directories(&child.build_name(&strings, true, true, false)?);
                let full = child.full_name(&strings, true)?;
                if self.cached(&full).is_none() {
                    self.new_resource(parent, &full, child, &strings)?;
                }
            }
        }

        self.complete(dir);
        Ok(dir)
    }

    /// `/modules/<module>/...` naming a resource rather than a listing.
    fn handle_resource(&mut self, image: &ImageFile, name: &str) -> Result<Option<NodeId>> {
        let Some(rest) = name.strip_prefix("/modules/") else {
            return Ok(None);
        };
        let Some(module_end) = rest.find('/') else {
            return Ok(None);
        };

        let module_path = &name[..MODULES.len() + 1 + module_end];
        match image.find_location(module_path)? {
            Some(module) if module.module_offset() != 0 => {}
            _ => return Ok(None),
        }

        let Some(location) = image.find_location(&name[MODULES.len()..])? else {
            return Ok(None);
        };
        if let Some(existing) = self.cached(name) {
            return Ok(Some(existing));
        }

        let strings = image.strings();
        let dir = self.make_directories(&location.build_name(&strings, true, true, false)?);
        self.new_resource(dir, name, location, &strings).map(Some)
    }

    /// `/packages/<pkg>/<module>` without its own location: build the package first.
    fn handle_module_link(&mut self, image: &ImageFile, name: &str) -> Result<Option<NodeId>> {
        let Some(rest) = name.strip_prefix("/packages/") else {
            return Ok(None);
        };
        let Some(slash) = rest.find('/') else {
            return Ok(None);
        };

        self.find(image, &name[..PACKAGES.len() + 1 + slash])?;
        Ok(self.cached(name))
    }

    /// Create every missing directory along `path`, returning the last one.
    fn make_directories(&mut self, path: &str) -> NodeId {
        let mut last = self.root;
        for (slash, _) in path.match_indices('/').skip(1) {
            last = self.make_directory(&path[..slash], last);
        }
        self.make_directory(path, last)
    }

    fn make_directory(&mut self, path: &str, parent: NodeId) -> NodeId {
        match self.cached(path) {
            Some(existing) => existing,
            None => self.push(Some(parent), path, NodeFlags::NONE, false, empty_directory()),
        }
    }

    fn new_resource(
        &mut self,
        parent: NodeId,
        name: &str,
        location: Location,
        strings: &jimage_reader::StringTable<'_>,
    ) -> Result<NodeId> {
        let extension = location.extension(strings)?;
        let info = ResourceInfo::new(location, extension);
        Ok(self.push(Some(parent), name, NodeFlags::NONE, true, NodeKind::Resource(info)))
    }

    fn complete(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.index()];
        if !node.completed {
            node.completed = true;
            tracing::trace!(path = %node.name, children = node.children().len(), "completed directory");
        }
    }

    /// Allocate a node, register its path and attach it to `parent`.
    fn push(
        &mut self,
        parent: Option<NodeId>,
        name: &str,
        flags: NodeFlags,
        completed: bool,
        kind: NodeKind,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let name: Arc<str> = Arc::from(name);

        self.nodes.push(Node {
            id,
            name: name.clone(),
            flags,
            completed,
            attributes: self.attributes,
            kind,
        });
        self.paths.insert(name, id);

        if let Some(parent) = parent {
            let parent = &mut self.nodes[parent.index()];
            match &mut parent.kind {
                NodeKind::Directory { children } if !parent.completed => children.push(id),
                _ => tracing::warn!(parent = %parent.name, "node added outside an open directory"),
            }
        }

        tracing::trace!(path = %self.nodes[id.index()].name, "materialized node");
        id
    }
}

fn empty_directory() -> NodeKind {
    NodeKind::Directory {
        children: Vec::new(),
    }
}
