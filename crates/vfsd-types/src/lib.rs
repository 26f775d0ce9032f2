//! Shared types for vfsd.
//!
//! A leaf crate with no internal dependencies: the path model, nodes and
//! their stats, capability flags, and the error taxonomy that every provider
//! and the daemon speak.
//!
//! # Key Types
//!
//! |-------------------|----------------------------------------------|
//! | Type              | Purpose                                      |
//! |-------------------|----------------------------------------------|
//! | [`VfsPath`]       | Normalized path; first segment names a mount |
//! | [`Node`]          | File, directory, or symlink value            |
//! | [`Stats`]         | POSIX-shaped stat record                     |
//! | [`Capabilities`]  | Operations a provider supports               |
//! | [`VfsError`]      | Errors with errno mapping                    |
//! | [`MetaValue`]     | Typed provider metadata / config value       |
//! |-------------------|----------------------------------------------|

pub mod capability;
pub mod error;
pub mod meta;
pub mod node;
pub mod path;
pub mod stats;

pub use capability::Capabilities;
pub use error::{VfsError, VfsResult};
pub use meta::{MetaValue, Metadata};
pub use node::{Node, NodeKind};
pub use path::VfsPath;
pub use stats::Stats;
