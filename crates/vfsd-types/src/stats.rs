//! File statistics.
//!
//! `mode` follows POSIX stat layout: node kind in the `S_IFMT` bits, then
//! owner/group/other rwx bits. A mount adapter can pass it through as-is.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::meta::{MetaValue, Metadata};
use crate::node::NodeKind;

/// Mode bit constants.
pub mod mode {
    /// Mask for the node-kind bits.
    pub const S_IFMT: u32 = 0o170000;
    /// Regular file.
    pub const S_IFREG: u32 = 0o100000;
    /// Directory.
    pub const S_IFDIR: u32 = 0o040000;
    /// Symbolic link.
    pub const S_IFLNK: u32 = 0o120000;

    /// Mask for permission bits.
    pub const PERM_MASK: u32 = 0o7777;

    pub const S_IRUSR: u32 = 0o400;
    pub const S_IWUSR: u32 = 0o200;
    pub const S_IXUSR: u32 = 0o100;
    pub const S_IRGRP: u32 = 0o040;
    pub const S_IWGRP: u32 = 0o020;
    pub const S_IXGRP: u32 = 0o010;
    pub const S_IROTH: u32 = 0o004;
    pub const S_IWOTH: u32 = 0o002;
    pub const S_IXOTH: u32 = 0o001;

    /// r--r--r--
    pub const READ_ALL: u32 = S_IRUSR | S_IRGRP | S_IROTH;
    /// --x--x--x
    pub const EXEC_ALL: u32 = S_IXUSR | S_IXGRP | S_IXOTH;
}

/// Default I/O block size hint.
pub const DEFAULT_BLKSIZE: u32 = 4096;

/// Statistics for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// Size in bytes.
    pub size: u64,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Creation time.
    pub ctime: SystemTime,
    /// Kind + permission bits.
    pub mode: u32,
    /// Owning user.
    pub uid: u32,
    /// Owning group.
    pub gid: u32,
    /// Link count (1 for files, 2 for directories: self and parent).
    pub nlink: u32,
    /// Block size hint for I/O.
    pub blksize: u32,
    /// Virtual device number.
    pub dev: u64,
    /// Virtual inode number.
    pub ino: u64,
    /// Provider-specific metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Stats {
    fn with_mode(size: u64, mode: u32, nlink: u32) -> Self {
        let now = SystemTime::now();
        let (uid, gid) = current_identity();
        Self {
            size,
            atime: now,
            mtime: now,
            ctime: now,
            mode,
            uid,
            gid,
            nlink,
            blksize: DEFAULT_BLKSIZE,
            dev: 0,
            ino: 0,
            metadata: Metadata::new(),
        }
    }

    /// Read-only regular file of `size` bytes (`0o444`).
    pub fn for_file(size: u64) -> Self {
        Self::with_mode(size, mode::S_IFREG | mode::READ_ALL, 1)
    }

    /// Read-only directory (`0o555`).
    pub fn for_directory() -> Self {
        Self::with_mode(
            u64::from(DEFAULT_BLKSIZE),
            mode::S_IFDIR | mode::READ_ALL | mode::EXEC_ALL,
            2,
        )
    }

    /// Symlink whose target is `target_len` bytes long (`0o777`).
    pub fn for_symlink(target_len: u64) -> Self {
        Self::with_mode(target_len, mode::S_IFLNK | 0o777, 1)
    }

    /// Set or clear the owner write bit.
    pub fn writable(mut self, writable: bool) -> Self {
        if writable {
            self.mode |= mode::S_IWUSR;
        } else {
            self.mode &= !mode::S_IWUSR;
        }
        self
    }

    /// Set or clear the execute bits. Only meaningful for files.
    pub fn executable(mut self, executable: bool) -> Self {
        if self.kind() == NodeKind::File {
            if executable {
                self.mode |= mode::EXEC_ALL;
            } else {
                self.mode &= !mode::EXEC_ALL;
            }
        }
        self
    }

    /// Replace the permission bits, leaving the kind untouched.
    pub fn with_permissions(mut self, perm: u32) -> Self {
        self.mode = (self.mode & mode::S_IFMT) | (perm & mode::PERM_MASK);
        self
    }

    /// Set the modification time.
    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = mtime;
        self
    }

    /// Set the creation time.
    pub fn with_ctime(mut self, ctime: SystemTime) -> Self {
        self.ctime = ctime;
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Node kind encoded in the mode bits.
    pub fn kind(&self) -> NodeKind {
        match self.mode & mode::S_IFMT {
            mode::S_IFDIR => NodeKind::Directory,
            mode::S_IFLNK => NodeKind::Symlink,
            _ => NodeKind::File,
        }
    }

    /// Permission bits only.
    pub fn permissions(&self) -> u32 {
        self.mode & mode::PERM_MASK
    }

    /// True if the owner write bit is set.
    pub fn is_writable(&self) -> bool {
        self.mode & mode::S_IWUSR != 0
    }
}

#[cfg(unix)]
fn current_identity() -> (u32, u32) {
    (
        rustix::process::getuid().as_raw(),
        rustix::process::getgid().as_raw(),
    )
}

#[cfg(not(unix))]
fn current_identity() -> (u32, u32) {
    (0, 0)
}
