//! Provider capability flags.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Operations a provider supports.
    ///
    /// Declared once when a provider is constructed. The daemon checks these
    /// before dispatching any mutating operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Can read files.
        const READ = 1 << 0;
        /// Can write/modify files.
        const WRITE = 1 << 1;
        /// Can create files and directories.
        const CREATE = 1 << 2;
        /// Can delete files and directories.
        const DELETE = 1 << 3;
        /// Can rename/move within the provider.
        const RENAME = 1 << 4;
        /// Supports symbolic links.
        const SYMLINK = 1 << 5;
        /// Supports extended attributes.
        const XATTR = 1 << 6;
        /// Can notify about changes.
        const WATCH = 1 << 7;
        /// Supports server-side search.
        const SEARCH = 1 << 8;

        const READ_ONLY = Self::READ.bits();
        const READ_WRITE = Self::READ.bits()
            | Self::WRITE.bits()
            | Self::CREATE.bits()
            | Self::DELETE.bits()
            | Self::RENAME.bits();
        const FULL = Self::READ_WRITE.bits()
            | Self::SYMLINK.bits()
            | Self::XATTR.bits()
            | Self::WATCH.bits()
            | Self::SEARCH.bits();
    }
}

impl Capabilities {
    /// Lowercase names of the individual flags that are set.
    pub fn flag_names(&self) -> Vec<&'static str> {
        const NAMES: [(Capabilities, &str); 9] = [
            (Capabilities::READ, "read"),
            (Capabilities::WRITE, "write"),
            (Capabilities::CREATE, "create"),
            (Capabilities::DELETE, "delete"),
            (Capabilities::RENAME, "rename"),
            (Capabilities::SYMLINK, "symlink"),
            (Capabilities::XATTR, "xattr"),
            (Capabilities::WATCH, "watch"),
            (Capabilities::SEARCH, "search"),
        ];
        NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.flag_names();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(","))
        }
    }
}
