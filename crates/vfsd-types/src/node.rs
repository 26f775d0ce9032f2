//! Filesystem nodes.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::meta::{MetaValue, Metadata};
use crate::stats::Stats;

/// Node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

/// A file, directory, or symlink as seen by a caller.
///
/// Nodes are values: builders consume and return `Self`, and nothing
/// changes a node once a provider has handed it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Entry name (not full path). Empty for a mount or namespace root.
    pub name: String,
    pub kind: NodeKind,
    pub stats: Stats,
    /// Link target, only for symlinks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlink_target: Option<String>,
    /// Eagerly fetched content for small files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
    /// Opaque per-provider data (remote ids, etags, and so on).
    #[serde(default)]
    pub provider_data: Metadata,
}

impl Node {
    fn new(name: impl Into<String>, kind: NodeKind, stats: Stats) -> Self {
        Self {
            name: name.into(),
            kind,
            stats,
            symlink_target: None,
            content: None,
            provider_data: Metadata::new(),
        }
    }

    /// A read-only file of `size` bytes.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self::new(name, NodeKind::File, Stats::for_file(size))
    }

    /// A read-only file carrying its content. Size is the content length.
    pub fn file_with_content(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        let mut node = Self::file(name, content.len() as u64);
        node.content = Some(content);
        node
    }

    /// A read-only directory.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Directory, Stats::for_directory())
    }

    /// A symlink pointing at `target`.
    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        let mut node = Self::new(
            name,
            NodeKind::Symlink,
            Stats::for_symlink(target.len() as u64),
        );
        node.symlink_target = Some(target);
        node
    }

    /// Replace the stats. The kind bits of `stats` must agree with the node.
    pub fn with_stats(mut self, stats: Stats) -> Self {
        debug_assert_eq!(stats.kind(), self.kind);
        self.stats = stats;
        self
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.stats = self.stats.writable(writable);
        self
    }

    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.stats = self.stats.with_mtime(mtime);
        self
    }

    pub fn with_permissions(mut self, perm: u32) -> Self {
        self.stats = self.stats.with_permissions(perm);
        self
    }

    /// Attach a provider data entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.provider_data.insert(key.into(), value.into());
        self
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == NodeKind::Symlink
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.stats.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_kind_strings() {
        assert_eq!(NodeKind::Directory.to_string(), "directory");
        assert_eq!(NodeKind::from_str("symlink").unwrap(), NodeKind::Symlink);
        assert!(NodeKind::from_str("socket").is_err());
    }

    #[test]
    fn test_content_defines_size() {
        let n = Node::file_with_content("readme.md", b"hello".to_vec());
        assert!(n.is_file());
        assert_eq!(n.size(), 5);
        assert_eq!(n.content.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_symlink_target() {
        let n = Node::symlink("latest", "2024-01-01.md");
        assert!(n.is_symlink());
        assert_eq!(n.symlink_target.as_deref(), Some("2024-01-01.md"));
        assert_eq!(n.size(), 13);
        assert!(Node::file("x", 0).symlink_target.is_none());
    }

    #[test]
    fn test_builders_are_by_value() {
        let base = Node::directory("issues");
        let tagged = base.clone().writable(true).with_data("repo", "acme/widgets");
        assert!(!base.stats.is_writable());
        assert!(base.provider_data.is_empty());
        assert!(tagged.stats.is_writable());
        assert_eq!(tagged.provider_data["repo"], MetaValue::from("acme/widgets"));
        assert!(tagged.is_directory());
    }
}
