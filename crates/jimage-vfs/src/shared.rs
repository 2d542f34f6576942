//! Shared readers and handles.
//!
//! Opening the same image twice parses its index once: every open path maps
//! to one [`SharedImageReader`] in a process-wide registry, and each open
//! call hands out a lightweight [`ImageReader`] handle. The shared reader
//! lives until its last handle closes.

use std::hash::BuildHasherDefault;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use hashbrown::{HashMap as FastHashMap, HashSet as FastHashSet};
use jimage_reader::{Endian, ImageFile, ImageHeader, ImageOptions, Location};
use parking_lot::Mutex;
use rustc_hash::FxHasher;

use crate::node::{FileAttributes, Node, NodeId};
use crate::tree::Tree;
use crate::{Error, Result};

type FxHashMap<K, V> = FastHashMap<K, V, BuildHasherDefault<FxHasher>>;
type FxHashSet<T> = FastHashSet<T, BuildHasherDefault<FxHasher>>;

type Registry = Mutex<FxHashMap<PathBuf, Arc<SharedImageReader>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Mutex::new(FxHashMap::default()))
}

/// One opened image shared by every handle on the same path.
pub struct SharedImageReader {
    path: PathBuf,
    image: ImageFile,
    tree: Mutex<Tree>,
    /// Open handle ids; only changed under the registry lock.
    openers: Mutex<FxHashSet<u64>>,
}

impl SharedImageReader {
    fn new(path: PathBuf, options: ImageOptions) -> Result<Self> {
        let image = ImageFile::open_with(&path, options)?;
        let attributes = FileAttributes::from(&std::fs::metadata(&path)?);

        tracing::info!(path = %path.display(), "created shared image reader");

        Ok(Self {
            path,
            image,
            tree: Mutex::new(Tree::new(attributes)),
            openers: Mutex::new(FxHashSet::default()),
        })
    }

    /// Canonical path the reader is registered under.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn image(&self) -> &ImageFile {
        &self.image
    }

    /// Number of open handles.
    pub fn handle_count(&self) -> usize {
        self.openers.lock().len()
    }

    /// Number of nodes materialized so far, synthetic roots included.
    pub fn node_count(&self) -> usize {
        self.tree.lock().len()
    }

    /// Whether a shared reader is registered for `path`.
    pub fn is_registered<P: AsRef<Path>>(path: P) -> bool {
        std::fs::canonicalize(path)
            .map(|path| registry().lock().contains_key(&path))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for SharedImageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedImageReader")
            .field("path", &self.path)
            .field("image", &self.image)
            .field("handles", &self.openers.lock().len())
            .finish()
    }
}

/// A handle on an opened image.
///
/// Handles are cheap; every handle on the same path shares one index and one
/// virtual tree. Dropping an open handle closes it.
pub struct ImageReader {
    id: u64,
    shared: Weak<SharedImageReader>,
    closed: AtomicBool,
}

impl ImageReader {
    /// Open an image written in the native byte order.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ImageOptions::default())
    }

    /// Open an image, reusing the shared reader of an already open path.
    ///
    /// Reuse requires the same byte order; otherwise this fails with
    /// [`Error::ByteOrderMismatch`].
    pub fn open_with<P: AsRef<Path>>(path: P, options: ImageOptions) -> Result<Self> {
        let path = std::fs::canonicalize(path)?;
        let mut registry = registry().lock();

        let shared = match registry.get(&path) {
            Some(shared) => {
                if shared.image.endian() != options.endian() {
                    return Err(Error::ByteOrderMismatch { path });
                }
                Arc::clone(shared)
            }
            None => {
                let shared = Arc::new(SharedImageReader::new(path.clone(), options)?);
                registry.insert(path, Arc::clone(&shared));
                shared
            }
        };

        let id = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        shared.openers.lock().insert(id);
        tracing::debug!(path = %shared.path.display(), handle = id, "opened image handle");

        Ok(Self {
            id,
            shared: Arc::downgrade(&shared),
            closed: AtomicBool::new(false),
        })
    }

    /// Close this handle; the last handle on a path tears the shared reader down.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }
        let shared = self.shared.upgrade().ok_or(Error::Closed)?;

        let mut registry = registry().lock();
        let mut openers = shared.openers.lock();
        if !openers.remove(&self.id) {
            return Err(Error::Closed);
        }
        tracing::debug!(path = %shared.path.display(), handle = self.id, "closed image handle");

        if openers.is_empty() {
            drop(openers);
            if registry
                .get(&shared.path)
                .is_some_and(|registered| Arc::ptr_eq(registered, &shared))
            {
                registry.remove(&shared.path);
            }
            shared.tree.lock().clear();
            tracing::info!(path = %shared.path.display(), "released shared image reader");
        }
        Ok(())
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// The shared reader behind this handle.
    pub fn shared(&self) -> Result<Arc<SharedImageReader>> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        self.shared.upgrade().ok_or(Error::Closed)
    }

    /// Find or materialize the node at `path`.
    pub fn find_node(&self, path: &str) -> Result<Option<Node>> {
        let shared = self.shared()?;
        let mut tree = shared.tree.lock();
        match tree.find(&shared.image, path)? {
            Some(id) => Ok(Some(tree.node(id)?.clone())),
            None => Ok(None),
        }
    }

    /// Snapshot of a node by id.
    pub fn node(&self, id: NodeId) -> Result<Node> {
        let shared = self.shared()?;
        let tree = shared.tree.lock();
        tree.node(id).cloned()
    }

    /// `/`, always completed.
    pub fn root_directory(&self) -> Result<Node> {
        let shared = self.shared()?;
        let tree = shared.tree.lock();
        tree.node(tree.root()).cloned()
    }

    /// Children of a directory, completing it first if needed.
    pub fn children(&self, node: &Node) -> Result<Vec<Node>> {
        let shared = self.shared()?;
        let mut tree = shared.tree.lock();

        let mut id = node.id();
        if !tree.node(id)?.is_completed() {
            if let Some(found) = tree.find(&shared.image, node.name())? {
                id = found;
            }
        }

        let ids = tree.node(id)?.children().to_vec();
        ids.into_iter().map(|child| tree.node(child).cloned()).collect()
    }

    /// Resolve a link to its target; other nodes resolve to themselves.
    ///
    /// With `recursive`, one further hop is followed if the target is itself a link.
    pub fn resolve_link(&self, node: &Node, recursive: bool) -> Result<Node> {
        let shared = self.shared()?;
        let tree = shared.tree.lock();
        let id = tree.resolve_link(node.id(), recursive)?;
        tree.node(id).cloned()
    }

    /// Content of a resource node, or of the resource a link points to.
    pub fn read_node(&self, node: &Node) -> Result<Vec<u8>> {
        let target = if node.is_link() {
            self.resolve_link(node, true)?
        } else {
            node.clone()
        };
        let location = *target
            .resource()
            .ok_or_else(|| Error::NotAResource(node.name().to_string()))?
            .location();

        // Read outside the tree lock.
        let shared = self.shared()?;
        Ok(shared.image.read(&location)?)
    }

    /// Location of `name` inside `module`.
    pub fn find_location(&self, module: &str, name: &str) -> Result<Option<Location>> {
        Ok(self.shared()?.image.find_location_in(module, name)?)
    }

    pub fn read(&self, location: &Location) -> Result<Vec<u8>> {
        Ok(self.shared()?.image.read(location)?)
    }

    /// Content of `name` inside `module`, if present.
    pub fn read_resource(&self, module: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let shared = self.shared()?;
        match shared.image.find_location_in(module, name)? {
            Some(location) => Ok(Some(shared.image.read(&location)?)),
            None => Ok(None),
        }
    }

    pub fn entry_names(&self) -> Result<Vec<String>> {
        Ok(self.shared()?.image.entry_names()?)
    }

    pub fn module_names(&self) -> Result<Vec<String>> {
        Ok(self.shared()?.image.module_names()?)
    }

    pub fn header(&self) -> Result<ImageHeader> {
        Ok(*self.shared()?.image.header())
    }

    pub fn endian(&self) -> Result<Endian> {
        Ok(self.shared()?.image.endian())
    }
}

impl Drop for ImageReader {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "failed to close image handle on drop");
            }
        }
    }
}

impl std::fmt::Debug for ImageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageReader")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}
