//! VFS error types.
//!
//! Every kind maps onto a POSIX errno so a mount adapter can hand it
//! straight back to the kernel.

use std::io;

use thiserror::Error;

use crate::path::VfsPath;

/// Errors raised by providers and by the daemon.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Path does not exist.
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// Operation not permitted.
    #[error("permission denied ({operation}): {path}")]
    PermissionDenied { operation: String, path: String },

    /// Backend failure (network, malformed response, unimplemented path).
    #[error("I/O error: {message}{}", path_suffix(.path))]
    Io {
        message: String,
        path: Option<String>,
    },

    /// Something already exists at the path.
    #[error("file exists: {0}")]
    AlreadyExists(String),

    /// Directory still has children.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// File operation on a directory.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory operation on a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),
}

fn path_suffix(path: &Option<String>) -> String {
    path.as_ref().map(|p| format!(": {p}")).unwrap_or_default()
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl ToString) -> Self {
        Self::NotFound(path.to_string())
    }

    /// Create a PermissionDenied error for `operation` on `path`.
    pub fn permission_denied(path: impl ToString, operation: impl Into<String>) -> Self {
        Self::PermissionDenied {
            operation: operation.into(),
            path: path.to_string(),
        }
    }

    /// Create an Io error not tied to a path.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            path: None,
        }
    }

    /// Create an Io error for `path`.
    pub fn io_at(message: impl Into<String>, path: impl ToString) -> Self {
        Self::Io {
            message: message.into(),
            path: Some(path.to_string()),
        }
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl ToString) -> Self {
        Self::AlreadyExists(path.to_string())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl ToString) -> Self {
        Self::DirectoryNotEmpty(path.to_string())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl ToString) -> Self {
        Self::IsADirectory(path.to_string())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl ToString) -> Self {
        Self::NotADirectory(path.to_string())
    }

    /// POSIX errno for this error.
    pub fn errno(&self) -> i32 {
        match self {
            VfsError::NotFound(_) => 2,
            VfsError::PermissionDenied { .. } => 13,
            VfsError::Io { .. } => 5,
            VfsError::AlreadyExists(_) => 17,
            VfsError::DirectoryNotEmpty(_) => 39,
            VfsError::IsADirectory(_) => 21,
            VfsError::NotADirectory(_) => 20,
        }
    }

    /// The operation name carried by a PermissionDenied error.
    pub fn operation(&self) -> Option<&str> {
        match self {
            VfsError::PermissionDenied { operation, .. } => Some(operation),
            _ => None,
        }
    }

    /// The path this error refers to, when it has one.
    pub fn path(&self) -> Option<VfsPath> {
        match self {
            VfsError::NotFound(p)
            | VfsError::AlreadyExists(p)
            | VfsError::DirectoryNotEmpty(p)
            | VfsError::IsADirectory(p)
            | VfsError::NotADirectory(p)
            | VfsError::PermissionDenied { path: p, .. } => Some(VfsPath::parse(p)),
            VfsError::Io { path, .. } => path.as_deref().map(VfsPath::parse),
        }
    }
}

/// Convert VfsError to std::io::Error for a mount adapter.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        let kind = match &e {
            VfsError::NotFound(_) => io::ErrorKind::NotFound,
            VfsError::PermissionDenied { .. } => io::ErrorKind::PermissionDenied,
            VfsError::Io { .. } => io::ErrorKind::Other,
            VfsError::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
            VfsError::DirectoryNotEmpty(_) => io::ErrorKind::DirectoryNotEmpty,
            VfsError::IsADirectory(_) => io::ErrorKind::IsADirectory,
            VfsError::NotADirectory(_) => io::ErrorKind::NotADirectory,
        };
        io::Error::new(kind, e.to_string())
    }
}

/// Backend I/O failures keep their kind where there is a matching variant.
impl From<io::Error> for VfsError {
    fn from(e: io::Error) -> Self {
        let msg = e.to_string();
        match e.kind() {
            io::ErrorKind::NotFound => VfsError::NotFound(msg),
            io::ErrorKind::PermissionDenied => VfsError::PermissionDenied {
                operation: "access".to_string(),
                path: msg,
            },
            io::ErrorKind::AlreadyExists => VfsError::AlreadyExists(msg),
            io::ErrorKind::DirectoryNotEmpty => VfsError::DirectoryNotEmpty(msg),
            io::ErrorKind::IsADirectory => VfsError::IsADirectory(msg),
            io::ErrorKind::NotADirectory => VfsError::NotADirectory(msg),
            _ => VfsError::io(msg),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(VfsError::not_found("/a").errno(), 2);
        assert_eq!(VfsError::permission_denied("/a", "write").errno(), 13);
        assert_eq!(VfsError::io("boom").errno(), 5);
        assert_eq!(VfsError::already_exists("/a").errno(), 17);
        assert_eq!(VfsError::directory_not_empty("/a").errno(), 39);
        assert_eq!(VfsError::is_a_directory("/a").errno(), 21);
        assert_eq!(VfsError::not_a_directory("/a").errno(), 20);
    }

    #[test]
    fn test_messages() {
        let e = VfsError::permission_denied(VfsPath::parse("/gh/x"), "write");
        assert_eq!(e.to_string(), "permission denied (write): /gh/x");
        assert_eq!(e.operation(), Some("write"));
        assert_eq!(e.path(), Some(VfsPath::parse("/gh/x")));

        assert_eq!(VfsError::io("timeout").to_string(), "I/O error: timeout");
        assert_eq!(
            VfsError::io_at("cannot rename across providers", "/a/x").to_string(),
            "I/O error: cannot rename across providers: /a/x"
        );
    }

    #[test]
    fn test_io_round_trip_kinds() {
        let io_err: io::Error = VfsError::is_a_directory("/d").into();
        assert_eq!(io_err.kind(), io::ErrorKind::IsADirectory);

        let back: VfsError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(back, VfsError::NotFound(_)));

        let other: VfsError = io::Error::other("reset").into();
        assert_eq!(other.errno(), 5);
    }
}
