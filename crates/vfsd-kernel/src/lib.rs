//! # vfsd-kernel
//!
//! One path-based namespace over many external services.
//!
//! Every backend implements the [`Provider`] contract and is mounted into a
//! [`Daemon`] under a single path segment:
//! - `/github/...` routes to the GitHub provider, `/slack/...` to Slack
//! - Reads need no capability; mutations are gated on [`Capabilities`]
//! - Slow backends can be wrapped in a [`CachingProvider`]
//! - Providers are built by a [`ProviderRegistry`], filled by discovery
//!
//! Concrete service adapters live in their own crates. The only provider
//! shipped here is [`MemoryProvider`].

pub mod base;
pub mod cache;
pub mod config;
pub mod daemon;
pub mod discovery;
pub mod provider;
pub mod providers;
pub mod registry;

pub use base::{FileHandle, HandleTable, ProviderBase};
pub use cache::{CachingProvider, TtlCache};
pub use config::{
    ConfigError, ConfigMap, DaemonConfig, KNOWN_PROVIDERS, KnownProvider, ProviderConfig,
    VfsdConfig, known_provider,
};
pub use daemon::{Daemon, DaemonError, DaemonState, MountFailure, MountInfo, MountReport};
pub use discovery::{
    DiscoveryFailure, DiscoveryReport, EntryPoint, PluginCatalog, ProviderManifest,
    ProviderPlugin,
};
pub use provider::{DirStream, Page, Provider, collect_listing, listing, paginated};
pub use providers::MemoryProvider;
pub use registry::{FromConfig, ProviderFactory, ProviderInfo, ProviderRegistry, RegistryError};

pub use vfsd_types::{
    Capabilities, MetaValue, Metadata, Node, NodeKind, Stats, VfsError, VfsPath, VfsResult,
};
