//! The provider contract.
//!
//! Every backend implements [`Provider`]. Paths handed to a provider are
//! relative to its own root (the daemon strips the mount segment first);
//! the empty relative path is the provider's root directory.

use std::future::Future;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, TryStreamExt};
use vfsd_types::{Capabilities, Node, VfsError, VfsPath, VfsResult};

/// A one-shot, forward-only directory listing.
///
/// Backends with paginated APIs should produce entries lazily so a caller
/// that stops pulling never triggers the remaining page fetches.
pub type DirStream = BoxStream<'static, VfsResult<Node>>;

/// Uniform contract every backend implements.
///
/// Only the read side is mandatory. Optional operations default to
/// `PermissionDenied` naming the operation, so a read-only backend
/// implements four methods and nothing else.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name. Also the default mount segment.
    fn name(&self) -> &str;

    /// Operations this provider supports. Fixed for the provider's lifetime.
    fn capabilities(&self) -> Capabilities;

    /// True if every flag in `caps` is supported.
    fn supports(&self, caps: Capabilities) -> bool {
        self.capabilities().contains(caps)
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Node at `path`.
    async fn get_node(&self, path: &VfsPath) -> VfsResult<Node>;

    /// Children of the directory at `path`.
    async fn list_directory(&self, path: &VfsPath) -> VfsResult<DirStream>;

    /// Read up to `size` bytes starting at `offset`; `None` reads to EOF.
    async fn read_file(
        &self,
        path: &VfsPath,
        offset: u64,
        size: Option<u64>,
    ) -> VfsResult<Vec<u8>>;

    /// Target of the symlink at `path`.
    async fn read_symlink(&self, path: &VfsPath) -> VfsResult<String> {
        Err(VfsError::permission_denied(path, "readlink"))
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write `data` at `offset`. Returns the number of bytes written.
    async fn write_file(&self, path: &VfsPath, data: &[u8], offset: u64) -> VfsResult<u64> {
        let _ = (data, offset);
        Err(VfsError::permission_denied(path, "write"))
    }

    /// Create an empty file.
    async fn create_file(&self, path: &VfsPath, mode: u32) -> VfsResult<Node> {
        let _ = mode;
        Err(VfsError::permission_denied(path, "create"))
    }

    /// Create a directory.
    async fn create_directory(&self, path: &VfsPath, mode: u32) -> VfsResult<Node> {
        let _ = mode;
        Err(VfsError::permission_denied(path, "mkdir"))
    }

    /// Remove a file or an empty directory.
    async fn delete(&self, path: &VfsPath) -> VfsResult<()> {
        Err(VfsError::permission_denied(path, "delete"))
    }

    /// Move `old` to `new` within this provider.
    async fn rename(&self, old: &VfsPath, new: &VfsPath) -> VfsResult<()> {
        let _ = new;
        Err(VfsError::permission_denied(old, "rename"))
    }

    /// Create a symlink at `path` pointing at `target`.
    async fn create_symlink(&self, path: &VfsPath, target: &str) -> VfsResult<Node> {
        let _ = target;
        Err(VfsError::permission_denied(path, "symlink"))
    }

    // ========================================================================
    // Extended attributes
    // ========================================================================

    async fn get_xattr(&self, path: &VfsPath, name: &str) -> VfsResult<Vec<u8>> {
        Err(VfsError::not_found(format!("{path}:{name}")))
    }

    async fn set_xattr(&self, path: &VfsPath, name: &str, value: &[u8]) -> VfsResult<()> {
        let _ = (name, value);
        Err(VfsError::permission_denied(path, "setxattr"))
    }

    async fn list_xattr(&self, path: &VfsPath) -> VfsResult<Vec<String>> {
        let _ = path;
        Ok(Vec::new())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Called once when the daemon starts (or on registration while running).
    async fn initialize(&self) -> VfsResult<()> {
        Ok(())
    }

    /// Called once when the daemon shuts down.
    async fn shutdown(&self) -> VfsResult<()> {
        Ok(())
    }

    /// Drop anything stale and re-sync with the backend.
    async fn refresh(&self) -> VfsResult<()> {
        Ok(())
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub nodes: Vec<Node>,
    /// Cursor for the next page; `None` on the last page.
    pub next: Option<String>,
}

impl Page {
    pub fn new(nodes: Vec<Node>, next: Option<String>) -> Self {
        Self { nodes, next }
    }

    pub fn last(nodes: Vec<Node>) -> Self {
        Self { nodes, next: None }
    }
}

/// Build a lazy listing over a page-fetching closure.
///
/// `fetch` receives `None` for the first page and the previous page's cursor
/// after that. It is only called when the consumer has drained the current
/// page and asks for more. A fetch error is yielded once and ends the stream.
pub fn paginated<F, Fut>(mut fetch: F) -> DirStream
where
    F: FnMut(Option<String>) -> Fut + Send + 'static,
    Fut: Future<Output = VfsResult<Page>> + Send + 'static,
{
    Box::pin(stream! {
        let mut cursor: Option<String> = None;
        loop {
            match fetch(cursor.take()).await {
                Ok(page) => {
                    for node in page.nodes {
                        yield Ok(node);
                    }
                    match page.next {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    })
}

/// A listing over nodes that are already in memory.
pub fn listing(nodes: Vec<Node>) -> DirStream {
    Box::pin(stream::iter(nodes.into_iter().map(Ok)))
}

/// Drain a listing into a vector, stopping at the first error.
pub async fn collect_listing(entries: DirStream) -> VfsResult<Vec<Node>> {
    entries.try_collect().await
}
