//! In-memory provider.
//!
//! Used for scratch space and testing. All data is lost when dropped.

use std::collections::BTreeMap;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::RwLock;
use vfsd_types::{Capabilities, Node, NodeKind, Stats, VfsError, VfsPath, VfsResult};

use crate::base::{FileHandle, ProviderBase};
use crate::config::ConfigMap;
use crate::provider::{DirStream, Provider, listing};
use crate::registry::FromConfig;

#[derive(Debug, Clone)]
enum Content {
    File(Vec<u8>),
    Directory,
    Symlink(String),
}

#[derive(Debug, Clone)]
struct Entry {
    content: Content,
    stats: Stats,
    xattrs: BTreeMap<String, Vec<u8>>,
}

impl Entry {
    fn directory() -> Self {
        Self {
            content: Content::Directory,
            stats: Stats::for_directory().writable(true),
            xattrs: BTreeMap::new(),
        }
    }

    fn file(data: Vec<u8>, perm: u32) -> Self {
        Self {
            stats: Stats::for_file(data.len() as u64).with_permissions(perm),
            content: Content::File(data),
            xattrs: BTreeMap::new(),
        }
    }

    fn symlink(target: String) -> Self {
        Self {
            stats: Stats::for_symlink(target.len() as u64),
            content: Content::Symlink(target),
            xattrs: BTreeMap::new(),
        }
    }

    fn to_node(&self, path: &VfsPath) -> Node {
        let name = path.file_name().unwrap_or_default();
        let node = match &self.content {
            Content::File(_) => Node::file(name, self.stats.size),
            Content::Directory => Node::directory(name),
            Content::Symlink(target) => Node::symlink(name, target.clone()),
        };
        node.with_stats(self.stats.clone())
    }
}

/// In-memory provider supporting every optional operation except watch and
/// search.
///
/// Entries are keyed by provider-relative path; the root directory always
/// exists. Thread-safe via an internal `RwLock` that is never held across
/// an await.
#[derive(Debug)]
pub struct MemoryProvider {
    base: ProviderBase,
    entries: RwLock<BTreeMap<VfsPath, Entry>>,
}

impl MemoryProvider {
    /// Largest file a write may produce.
    pub const MAX_FILE_SIZE: u64 = 1 << 30;

    /// Capabilities of a writable memory provider.
    pub const CAPABILITIES: Capabilities = Capabilities::FULL
        .difference(Capabilities::WATCH)
        .difference(Capabilities::SEARCH);

    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capabilities(name, Self::CAPABILITIES)
    }

    /// Memory provider that only advertises READ.
    pub fn read_only(name: impl Into<String>) -> Self {
        Self::with_capabilities(name, Capabilities::READ_ONLY)
    }

    pub fn with_capabilities(name: impl Into<String>, capabilities: Capabilities) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(VfsPath::empty(), Entry::directory());
        Self {
            base: ProviderBase::new(name, capabilities),
            entries: RwLock::new(entries),
        }
    }

    /// Insert or replace a file, creating parent directories.
    ///
    /// Bypasses capability checks, so read-only providers can be populated.
    pub fn seed_file(&self, path: impl Into<VfsPath>, data: impl Into<Vec<u8>>) {
        let key = Self::key(&path.into());
        let mut entries = self.entries.write();
        Self::ensure_parents(&mut entries, &key);
        entries.insert(key, Entry::file(data.into(), 0o644));
    }

    /// Create a directory and its parents if missing.
    pub fn seed_directory(&self, path: impl Into<VfsPath>) {
        let key = Self::key(&path.into());
        let mut entries = self.entries.write();
        Self::ensure_parents(&mut entries, &key);
        entries.entry(key).or_insert_with(Entry::directory);
    }

    /// Number of entries, including the root.
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    // ========================================================================
    // Handle-based I/O
    // ========================================================================

    /// Open a file for sequential reads.
    pub fn open(&self, path: &VfsPath) -> VfsResult<FileHandle> {
        let key = Self::key(path);
        match self.entries.read().get(&key).map(|e| &e.content) {
            Some(Content::File(_)) => {}
            Some(Content::Directory) => return Err(VfsError::is_a_directory(&key)),
            Some(Content::Symlink(_)) => return Err(VfsError::io_at("cannot open symlink", &key)),
            None => return Err(VfsError::not_found(&key)),
        }
        Ok(self.base.allocate_handle(key))
    }

    /// Read up to `size` bytes from the handle's position and advance it.
    pub fn read_at(&self, handle: FileHandle, size: u64) -> VfsResult<Vec<u8>> {
        let path = self
            .base
            .handle_path(handle)
            .ok_or_else(|| VfsError::io(format!("bad file handle: {handle}")))?;
        let position = self.base.handle_position(handle).unwrap_or(0);
        let data = self.read_range(&path, position, Some(size))?;
        self.base
            .set_handle_position(handle, position + data.len() as u64);
        Ok(data)
    }

    /// Close a handle. Returns false if it was not open.
    pub fn close(&self, handle: FileHandle) -> bool {
        self.base.release_handle(handle)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Provider-relative key for any incoming path.
    fn key(path: &VfsPath) -> VfsPath {
        VfsPath::empty().join_path(path)
    }

    /// Proper ancestors of `key`, outermost first.
    fn ancestors(key: &VfsPath) -> impl Iterator<Item = VfsPath> + '_ {
        let parents = key.len().saturating_sub(1);
        key.segments()
            .iter()
            .take(parents)
            .scan(VfsPath::empty(), |current, segment| {
                *current = current.join(segment);
                Some(current.clone())
            })
    }

    /// Make every ancestor of `key` a directory, replacing anything else.
    /// Callers that must not clobber run [`Self::check_ancestors`] first.
    fn ensure_parents(entries: &mut BTreeMap<VfsPath, Entry>, key: &VfsPath) {
        for ancestor in Self::ancestors(key) {
            let is_dir = matches!(
                entries.get(&ancestor).map(|e| &e.content),
                Some(Content::Directory)
            );
            if !is_dir {
                entries.insert(ancestor, Entry::directory());
            }
        }
    }

    /// Fail if an existing ancestor of `key` is not a directory.
    fn check_ancestors(entries: &BTreeMap<VfsPath, Entry>, key: &VfsPath) -> VfsResult<()> {
        for ancestor in Self::ancestors(key) {
            match entries.get(&ancestor).map(|e| &e.content) {
                Some(Content::Directory) | None => {}
                Some(_) => return Err(VfsError::not_a_directory(&ancestor)),
            }
        }
        Ok(())
    }

    fn insert_new(&self, path: &VfsPath, entry: Entry) -> VfsResult<Node> {
        let key = Self::key(path);
        if key.is_empty() {
            return Err(VfsError::already_exists(&key));
        }
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return Err(VfsError::already_exists(&key));
        }
        Self::check_ancestors(&entries, &key)?;
        Self::ensure_parents(&mut entries, &key);
        let node = entry.to_node(&key);
        entries.insert(key, entry);
        Ok(node)
    }

    fn has_children(entries: &BTreeMap<VfsPath, Entry>, key: &VfsPath) -> bool {
        entries
            .keys()
            .any(|k| k != key && k.starts_with(key))
    }

    fn read_range(&self, path: &VfsPath, offset: u64, size: Option<u64>) -> VfsResult<Vec<u8>> {
        let key = Self::key(path);
        let entries = self.entries.read();
        match entries.get(&key).map(|e| &e.content) {
            Some(Content::File(data)) => {
                let len = data.len() as u64;
                let start = offset.min(len);
                let end = size.map_or(len, |s| start.saturating_add(s).min(len));
                Ok(data[start as usize..end as usize].to_vec())
            }
            Some(Content::Directory) => Err(VfsError::is_a_directory(&key)),
            Some(Content::Symlink(_)) => {
                Err(VfsError::io_at("cannot read symlink as file", &key))
            }
            None => Err(VfsError::not_found(&key)),
        }
    }

    fn write_range(&self, path: &VfsPath, data: &[u8], offset: u64) -> VfsResult<u64> {
        let key = Self::key(path);
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&key)
            .ok_or_else(|| VfsError::not_found(&key))?;
        match &mut entry.content {
            Content::File(file_data) => {
                let end = offset
                    .checked_add(data.len() as u64)
                    .filter(|end| *end <= Self::MAX_FILE_SIZE)
                    .ok_or_else(|| VfsError::io_at("write past maximum file size", &key))?;
                let (offset, end) = (offset as usize, end as usize);
                if end > file_data.len() {
                    file_data.resize(end, 0);
                }
                file_data[offset..end].copy_from_slice(data);
                entry.stats.size = file_data.len() as u64;
                entry.stats.mtime = SystemTime::now();
                Ok(data.len() as u64)
            }
            Content::Directory => Err(VfsError::is_a_directory(&key)),
            Content::Symlink(_) => Err(VfsError::io_at("cannot write to symlink", &key)),
        }
    }

    fn remove(&self, path: &VfsPath) -> VfsResult<()> {
        let key = Self::key(path);
        if key.is_empty() {
            return Err(VfsError::permission_denied(&key, "delete"));
        }
        let mut entries = self.entries.write();
        match entries.get(&key).map(|e| e.stats.kind()) {
            Some(NodeKind::Directory) if Self::has_children(&entries, &key) => {
                Err(VfsError::directory_not_empty(&key))
            }
            Some(_) => {
                entries.remove(&key);
                Ok(())
            }
            None => Err(VfsError::not_found(&key)),
        }
    }

    fn move_tree(&self, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        let from = Self::key(old);
        let to = Self::key(new);
        if from.is_empty() || to.is_empty() {
            return Err(VfsError::permission_denied(&from, "rename"));
        }
        if from == to {
            return Ok(());
        }
        if to.starts_with(&from) {
            return Err(VfsError::io_at("cannot move a directory into itself", &from));
        }

        let mut entries = self.entries.write();
        if !entries.contains_key(&from) {
            return Err(VfsError::not_found(&from));
        }
        if let Some(existing) = entries.get(&to) {
            if existing.stats.kind() == NodeKind::Directory && Self::has_children(&entries, &to) {
                return Err(VfsError::directory_not_empty(&to));
            }
        }
        Self::check_ancestors(&entries, &to)?;
        Self::ensure_parents(&mut entries, &to);

        let moved: Vec<VfsPath> = entries
            .keys()
            .filter(|k| k.starts_with(&from))
            .cloned()
            .collect();
        for old_key in moved {
            if let (Some(entry), Some(relative)) =
                (entries.remove(&old_key), old_key.strip_prefix(&from))
            {
                entries.insert(to.join_path(&relative), entry);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.base.capabilities()
    }

    async fn get_node(&self, path: &VfsPath) -> VfsResult<Node> {
        let key = Self::key(path);
        self.entries
            .read()
            .get(&key)
            .map(|entry| entry.to_node(&key))
            .ok_or_else(|| VfsError::not_found(&key))
    }

    async fn list_directory(&self, path: &VfsPath) -> VfsResult<DirStream> {
        let key = Self::key(path);
        let entries = self.entries.read();
        match entries.get(&key).map(|e| &e.content) {
            Some(Content::Directory) => {}
            Some(_) => return Err(VfsError::not_a_directory(&key)),
            None => return Err(VfsError::not_found(&key)),
        }
        let children: Vec<Node> = entries
            .iter()
            .filter(|(k, _)| k.parent().as_ref() == Some(&key))
            .map(|(k, entry)| entry.to_node(k))
            .collect();
        Ok(listing(children))
    }

    async fn read_file(
        &self,
        path: &VfsPath,
        offset: u64,
        size: Option<u64>,
    ) -> VfsResult<Vec<u8>> {
        self.read_range(path, offset, size)
    }

    async fn read_symlink(&self, path: &VfsPath) -> VfsResult<String> {
        let key = Self::key(path);
        match self.entries.read().get(&key).map(|e| &e.content) {
            Some(Content::Symlink(target)) => Ok(target.clone()),
            Some(_) => Err(VfsError::io_at("not a symlink", &key)),
            None => Err(VfsError::not_found(&key)),
        }
    }

    async fn write_file(&self, path: &VfsPath, data: &[u8], offset: u64) -> VfsResult<u64> {
        self.write_range(path, data, offset)
    }

    async fn create_file(&self, path: &VfsPath, mode: u32) -> VfsResult<Node> {
        self.insert_new(path, Entry::file(Vec::new(), mode))
    }

    async fn create_directory(&self, path: &VfsPath, mode: u32) -> VfsResult<Node> {
        let mut dir = Entry::directory();
        dir.stats = dir.stats.with_permissions(mode);
        self.insert_new(path, dir)
    }

    async fn delete(&self, path: &VfsPath) -> VfsResult<()> {
        self.remove(path)
    }

    async fn rename(&self, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        self.move_tree(old, new)
    }

    async fn create_symlink(&self, path: &VfsPath, target: &str) -> VfsResult<Node> {
        self.insert_new(path, Entry::symlink(target.to_string()))
    }

    async fn get_xattr(&self, path: &VfsPath, name: &str) -> VfsResult<Vec<u8>> {
        let key = Self::key(path);
        let entries = self.entries.read();
        let entry = entries.get(&key).ok_or_else(|| VfsError::not_found(&key))?;
        entry
            .xattrs
            .get(name)
            .cloned()
            .ok_or_else(|| VfsError::not_found(format!("{key}:{name}")))
    }

    async fn set_xattr(&self, path: &VfsPath, name: &str, value: &[u8]) -> VfsResult<()> {
        let key = Self::key(path);
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&key)
            .ok_or_else(|| VfsError::not_found(&key))?;
        entry.xattrs.insert(name.to_string(), value.to_vec());
        Ok(())
    }

    async fn list_xattr(&self, path: &VfsPath) -> VfsResult<Vec<String>> {
        let key = Self::key(path);
        self.entries
            .read()
            .get(&key)
            .map(|entry| entry.xattrs.keys().cloned().collect())
            .ok_or_else(|| VfsError::not_found(&key))
    }
}

/// Config keys: `name` (default `"memory"`), `read_only` (default false),
/// and `files`, a map of path to initial text content.
impl FromConfig for MemoryProvider {
    fn from_config(config: &ConfigMap) -> anyhow::Result<Self> {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("memory");
        let read_only = config
            .get("read_only")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let provider = if read_only {
            Self::read_only(name)
        } else {
            Self::new(name)
        };
        if let Some(files) = config.get("files") {
            let files = files
                .as_map()
                .ok_or_else(|| anyhow::anyhow!("`files` must be a table of path = content"))?;
            for (path, content) in files {
                let text = content
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("content for {path} must be a string"))?;
                provider.seed_file(path.as_str(), text.as_bytes().to_vec());
            }
        }
        Ok(provider)
    }
}
