//! Virtual paths.
//!
//! A [`VfsPath`] is a normalized sequence of segments plus a root marker.
//! The first segment of an absolute path names the mounted provider; the
//! rest is handed to that provider as a relative path.
//!
//! ```text
//! /github/acme/widgets/issues/42
//!  ^^^^^^ ^^^^^^^^^^^^^^^^^^^^^^
//!  provider   provider-relative path
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A normalized virtual filesystem path.
///
/// Parsing never fails: empty segments and `.` are dropped, `..` removes the
/// previous segment (and is ignored at the top). Two paths built from the
/// same segments with the same root marker are always equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct VfsPath {
    absolute: bool,
    segments: Vec<String>,
}

impl VfsPath {
    /// The namespace root, `/`.
    pub fn root() -> Self {
        Self {
            absolute: true,
            segments: Vec::new(),
        }
    }

    /// The empty relative path, `.` (a provider's own root).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a slash-delimited path.
    pub fn parse(s: &str) -> Self {
        let mut path = Self {
            absolute: s.starts_with('/'),
            segments: Vec::new(),
        };
        path.push_str(s);
        path
    }

    /// Rebuild an absolute path from a provider name and a provider-relative path.
    pub fn from_provider(provider: &str, relative: &VfsPath) -> Self {
        Self::root().join(provider).join_path(relative)
    }

    fn push_str(&mut self, s: &str) {
        for segment in s.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    self.segments.pop();
                }
                other => self.segments.push(other.to_string()),
            }
        }
    }

    /// True for `/`.
    pub fn is_root(&self) -> bool {
        self.absolute && self.segments.is_empty()
    }

    /// True when the path has no segments (`/` or `.`).
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when the path starts at the namespace root.
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// The same segments, anchored at the root.
    pub fn to_absolute(&self) -> Self {
        Self {
            absolute: true,
            segments: self.segments.clone(),
        }
    }

    /// Ordered non-root components.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// First segment: the mounted provider's name. `None` at the root.
    pub fn provider_name(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// Everything after the provider segment, as a relative path.
    pub fn provider_relative_path(&self) -> VfsPath {
        Self {
            absolute: false,
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    /// Last segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Path without its last segment. `None` when already empty.
    pub fn parent(&self) -> Option<VfsPath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            absolute: self.absolute,
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a (possibly multi-segment) relative string.
    pub fn join(&self, other: &str) -> VfsPath {
        let mut joined = self.clone();
        joined.push_str(other);
        joined
    }

    /// Append another path's segments. Its root marker is ignored.
    pub fn join_path(&self, other: &VfsPath) -> VfsPath {
        let mut joined = self.clone();
        joined.segments.extend(other.segments.iter().cloned());
        joined
    }

    /// True if `self` equals `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &VfsPath) -> bool {
        self.absolute == prefix.absolute && self.segments.starts_with(&prefix.segments)
    }

    /// Strip a leading `prefix`, yielding a relative path.
    pub fn strip_prefix(&self, prefix: &VfsPath) -> Option<VfsPath> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(Self {
            absolute: false,
            segments: self.segments[prefix.segments.len()..].to_vec(),
        })
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.absolute, self.segments.is_empty()) {
            (true, true) => f.write_str("/"),
            (false, true) => f.write_str("."),
            (true, false) => write!(f, "/{}", self.segments.join("/")),
            (false, false) => f.write_str(&self.segments.join("/")),
        }
    }
}

impl FromStr for VfsPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for VfsPath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for VfsPath {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<&String> for VfsPath {
    fn from(s: &String) -> Self {
        Self::parse(s)
    }
}

impl From<&VfsPath> for VfsPath {
    fn from(p: &VfsPath) -> Self {
        p.clone()
    }
}

impl From<VfsPath> for String {
    fn from(p: VfsPath) -> Self {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(VfsPath::parse("/a//b/./c/"), VfsPath::parse("/a/b/c"));
        assert_eq!(VfsPath::parse("/a/b/../c"), VfsPath::parse("/a/c"));
        assert_eq!(VfsPath::parse("/../.."), VfsPath::root());
        assert_eq!(VfsPath::parse(""), VfsPath::empty());
        assert_eq!(VfsPath::parse("."), VfsPath::empty());
    }

    #[test]
    fn test_root_vs_empty() {
        let root = VfsPath::parse("/");
        assert!(root.is_root());
        assert!(root.is_empty());
        assert_eq!(root.provider_name(), None);

        let empty = VfsPath::empty();
        assert!(!empty.is_root());
        assert!(empty.is_empty());
        assert_ne!(root, empty);
        assert_eq!(empty.to_absolute(), root);
    }

    #[test]
    fn test_provider_views() {
        let p = VfsPath::parse("/slack/general/messages");
        assert_eq!(p.provider_name(), Some("slack"));
        assert_eq!(p.provider_relative_path(), VfsPath::parse("general/messages"));
        assert_eq!(p.segments(), ["slack", "general", "messages"]);

        let mount = VfsPath::parse("/slack");
        assert_eq!(mount.provider_relative_path(), VfsPath::empty());
        assert_eq!(mount.provider_relative_path().to_string(), ".");
    }

    #[test]
    fn test_round_trip_through_provider() {
        for s in ["/a", "/a/b", "/slack/general/2024-01-01.md", "/x/y/z/w"] {
            let p = VfsPath::parse(s);
            let name = p.provider_name().unwrap();
            let rebuilt = VfsPath::from_provider(name, &p.provider_relative_path());
            assert_eq!(rebuilt, p, "round trip failed for {s}");
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(VfsPath::root().to_string(), "/");
        assert_eq!(VfsPath::parse("/a/b").to_string(), "/a/b");
        assert_eq!(VfsPath::parse("a/b").to_string(), "a/b");
    }

    #[test]
    fn test_parent_and_file_name() {
        let p = VfsPath::parse("/a/b/c.txt");
        assert_eq!(p.file_name(), Some("c.txt"));
        assert_eq!(p.parent(), Some(VfsPath::parse("/a/b")));
        assert_eq!(VfsPath::root().parent(), None);
        assert_eq!(VfsPath::parse("/a").parent(), Some(VfsPath::root()));
    }

    #[test]
    fn test_join_and_prefix() {
        let base = VfsPath::parse("docs");
        assert_eq!(base.join("x/y"), VfsPath::parse("docs/x/y"));
        assert_eq!(
            VfsPath::root().join_path(&VfsPath::parse("q/r")),
            VfsPath::parse("/q/r")
        );

        let child = VfsPath::parse("docs/x/y");
        assert!(child.starts_with(&base));
        assert_eq!(child.strip_prefix(&base), Some(VfsPath::parse("x/y")));
        assert!(!VfsPath::parse("docsx/y").starts_with(&base));
    }

    #[test]
    fn test_serde_as_string() {
        let p = VfsPath::parse("/a/b");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"/a/b\"");
        let back: VfsPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
