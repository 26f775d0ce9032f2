//! TTL caching for providers.
//!
//! [`TtlCache`] is a string-keyed map whose entries expire a fixed duration
//! after insertion. [`CachingProvider`] decorates any provider with one.
//!
//! The cache never infers invalidation. Writes that go through
//! [`CachingProvider`] drop the keys they touch; changes made behind the
//! provider's back stay invisible until the TTL runs out or `refresh()` is
//! called.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::time::Instant;
use tracing::debug;
use vfsd_types::{Capabilities, Node, VfsPath, VfsResult};

use crate::provider::{DirStream, Provider, listing};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted.elapsed() >= ttl
    }
}

/// Key-value cache with per-entry expiry.
///
/// Thread-safe via DashMap. An entry is fresh while its age is strictly
/// less than the TTL; a lookup that finds an expired entry removes it.
///
/// Every invalidation bumps an epoch. Read-through callers snapshot it with
/// [`TtlCache::epoch`] before fetching and store with
/// [`TtlCache::insert_if_current`], so a value fetched before a concurrent
/// invalidation is never cached.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    ttl: Duration,
    max_entries: Option<usize>,
    epoch: AtomicU64,
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> TtlCache<V> {
    /// Default TTL: 5 minutes.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new() -> Self {
        Self::with_ttl(Self::DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: None,
            epoch: AtomicU64::new(0),
        }
    }

    /// Bounded cache. A full cache purges expired entries on insert, then
    /// evicts the oldest entry if that was not enough.
    pub fn with_capacity(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: Some(max_entries.max(1)),
            epoch: AtomicU64::new(0),
        }
    }

    /// Build a key from a category and a path: `"{category}:{path}"`.
    pub fn cache_key(category: &str, path: impl fmt::Display) -> String {
        format!("{}:{}", category, path)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Invalidation counter; changes whenever any key is invalidated.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    // Bumped before entries are removed, so an insert racing an
    // invalidation either sees the new epoch or is removed afterwards.
    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Fresh value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries
                .remove_if(key, |_, entry| entry.is_expired(self.ttl));
        }
        None
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        if let Some(max) = self.max_entries {
            if !self.entries.contains_key(&key) && self.entries.len() >= max {
                self.purge_expired();
                if self.entries.len() >= max {
                    self.evict_oldest();
                }
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    /// Store `value` only if nothing was invalidated since `epoch` was
    /// taken. Returns whether the value was kept.
    pub fn insert_if_current(&self, key: impl Into<String>, value: V, epoch: u64) -> bool {
        if self.epoch() != epoch {
            return false;
        }
        let key = key.into();
        self.insert(key.clone(), value);
        if self.epoch() != epoch {
            self.entries.remove(&key);
            return false;
        }
        true
    }

    /// Drop one key, or everything when `key` is `None`.
    pub fn invalidate(&self, key: Option<&str>) {
        self.bump_epoch();
        match key {
            Some(key) => {
                self.entries.remove(key);
            }
            None => self.entries.clear(),
        }
    }

    /// Drop every key starting with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.bump_epoch();
        self.entries.retain(|key, _| !key.starts_with(prefix));
    }

    pub fn clear(&self) {
        self.bump_epoch();
        self.entries.clear();
    }

    /// Remove every expired entry.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| !entry.is_expired(ttl));
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().inserted)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[derive(Debug, Clone)]
enum Cached {
    Node(Node),
    Listing(Vec<Node>),
    Content(Vec<u8>),
    Link(String),
}

type Cache = TtlCache<Cached>;

/// Provider decorator that caches reads for a fixed TTL.
///
/// Caches `get_node`, `list_directory`, `read_file` (per offset/size) and
/// `read_symlink`. A listing is streamed through as it is pulled and cached
/// only once the caller drains it without error. Name and capabilities are
/// the wrapped provider's.
pub struct CachingProvider {
    inner: Arc<dyn Provider>,
    cache: Arc<Cache>,
}

impl fmt::Debug for CachingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingProvider")
            .field("inner", &self.inner.name())
            .field("ttl", &self.cache.ttl())
            .field("entries", &self.cache.len())
            .finish()
    }
}

impl CachingProvider {
    pub fn new(inner: Arc<dyn Provider>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Arc::new(TtlCache::with_ttl(ttl)),
        }
    }

    pub fn with_capacity(inner: Arc<dyn Provider>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner,
            cache: Arc::new(TtlCache::with_capacity(ttl, max_entries)),
        }
    }

    pub fn inner(&self) -> &Arc<dyn Provider> {
        &self.inner
    }

    /// Number of cached entries.
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Drop everything cached for `path` and the listing of its parent.
    fn invalidate_path(&self, path: &VfsPath) {
        for category in ["node", "list", "link"] {
            self.cache.invalidate(Some(&Cache::cache_key(category, path)));
        }
        self.cache
            .invalidate_prefix(&format!("{}:", Cache::cache_key("read", path)));
        if let Some(parent) = path.parent() {
            self.cache
                .invalidate(Some(&Cache::cache_key("list", &parent)));
            self.cache
                .invalidate(Some(&Cache::cache_key("node", &parent)));
        }
    }

    /// Like `invalidate_path`, plus everything beneath `path`.
    fn invalidate_tree(&self, path: &VfsPath) {
        if path.is_empty() {
            self.cache.clear();
            return;
        }
        self.invalidate_path(path);
        for category in ["node", "list", "link", "read"] {
            self.cache
                .invalidate_prefix(&format!("{}/", Cache::cache_key(category, path)));
        }
    }
}

#[async_trait]
impl Provider for CachingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn get_node(&self, path: &VfsPath) -> VfsResult<Node> {
        let key = Cache::cache_key("node", path);
        if let Some(Cached::Node(node)) = self.cache.get(&key) {
            return Ok(node);
        }
        let epoch = self.cache.epoch();
        let node = self.inner.get_node(path).await?;
        self.cache
            .insert_if_current(key, Cached::Node(node.clone()), epoch);
        Ok(node)
    }

    async fn list_directory(&self, path: &VfsPath) -> VfsResult<DirStream> {
        let key = Cache::cache_key("list", path);
        if let Some(Cached::Listing(nodes)) = self.cache.get(&key) {
            return Ok(listing(nodes));
        }
        let epoch = self.cache.epoch();
        let mut entries = self.inner.list_directory(path).await?;
        let cache = Arc::clone(&self.cache);
        Ok(Box::pin(stream! {
            let mut seen = Vec::new();
            let mut failed = false;
            while let Some(entry) = entries.next().await {
                match entry {
                    Ok(node) => {
                        seen.push(node.clone());
                        yield Ok(node);
                    }
                    Err(e) => {
                        failed = true;
                        yield Err(e);
                        break;
                    }
                }
            }
            if !failed {
                cache.insert_if_current(key, Cached::Listing(seen), epoch);
            }
        }))
    }

    async fn read_file(
        &self,
        path: &VfsPath,
        offset: u64,
        size: Option<u64>,
    ) -> VfsResult<Vec<u8>> {
        let key = format!("{}:{}:{:?}", Cache::cache_key("read", path), offset, size);
        if let Some(Cached::Content(data)) = self.cache.get(&key) {
            return Ok(data);
        }
        let epoch = self.cache.epoch();
        let data = self.inner.read_file(path, offset, size).await?;
        self.cache
            .insert_if_current(key, Cached::Content(data.clone()), epoch);
        Ok(data)
    }

    async fn read_symlink(&self, path: &VfsPath) -> VfsResult<String> {
        let key = Cache::cache_key("link", path);
        if let Some(Cached::Link(target)) = self.cache.get(&key) {
            return Ok(target);
        }
        let epoch = self.cache.epoch();
        let target = self.inner.read_symlink(path).await?;
        self.cache
            .insert_if_current(key, Cached::Link(target.clone()), epoch);
        Ok(target)
    }

    async fn write_file(&self, path: &VfsPath, data: &[u8], offset: u64) -> VfsResult<u64> {
        let result = self.inner.write_file(path, data, offset).await;
        self.invalidate_path(path);
        result
    }

    async fn create_file(&self, path: &VfsPath, mode: u32) -> VfsResult<Node> {
        let result = self.inner.create_file(path, mode).await;
        self.invalidate_path(path);
        result
    }

    async fn create_directory(&self, path: &VfsPath, mode: u32) -> VfsResult<Node> {
        let result = self.inner.create_directory(path, mode).await;
        self.invalidate_path(path);
        result
    }

    async fn delete(&self, path: &VfsPath) -> VfsResult<()> {
        let result = self.inner.delete(path).await;
        self.invalidate_tree(path);
        result
    }

    async fn rename(&self, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        let result = self.inner.rename(old, new).await;
        self.invalidate_tree(old);
        self.invalidate_tree(new);
        result
    }

    async fn create_symlink(&self, path: &VfsPath, target: &str) -> VfsResult<Node> {
        let result = self.inner.create_symlink(path, target).await;
        self.invalidate_path(path);
        result
    }

    async fn get_xattr(&self, path: &VfsPath, name: &str) -> VfsResult<Vec<u8>> {
        self.inner.get_xattr(path, name).await
    }

    async fn set_xattr(&self, path: &VfsPath, name: &str, value: &[u8]) -> VfsResult<()> {
        let result = self.inner.set_xattr(path, name, value).await;
        self.cache
            .invalidate(Some(&Cache::cache_key("node", path)));
        result
    }

    async fn list_xattr(&self, path: &VfsPath) -> VfsResult<Vec<String>> {
        self.inner.list_xattr(path).await
    }

    async fn initialize(&self) -> VfsResult<()> {
        self.inner.initialize().await
    }

    async fn shutdown(&self) -> VfsResult<()> {
        self.cache.clear();
        self.inner.shutdown().await
    }

    async fn refresh(&self) -> VfsResult<()> {
        debug!(provider = %self.inner.name(), entries = self.cache.len(), "Clearing provider cache");
        self.cache.clear();
        self.inner.refresh().await
    }
}
