//! The multi-provider daemon.
//!
//! Owns the mount table, routes every operation by the first path segment,
//! and enforces capabilities before a provider is consulted.
//!
//! ```text
//! /github/acme/widgets/README.md
//!   │
//!   ├─ mount "github" ──► provider.read_file("acme/widgets/README.md")
//!   └─ capability gate (writes only)
//! ```
//!
//! The daemon never rewrites provider errors. The only errors it raises
//! itself are for conditions checked before dispatch: unknown or inactive
//! mount, missing capability, root mutation and cross-provider rename.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};
use vfsd_types::{Capabilities, Node, VfsError, VfsPath, VfsResult};

use crate::cache::CachingProvider;
use crate::config::{VfsdConfig, known_provider};
use crate::provider::{DirStream, Provider, listing};
use crate::registry::{ProviderRegistry, RegistryError};

/// Daemon-level registration errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("provider already registered: {0}")]
    AlreadyRegistered(String),

    #[error("invalid mount point {0:?}: expected a single segment such as /name")]
    InvalidMountPoint(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DaemonState {
    Unmounted,
    Initializing,
    Running,
}

/// A provider bound into the namespace.
pub struct MountedProvider {
    name: String,
    mount_name: String,
    provider: Arc<dyn Provider>,
    mounted_at: SystemTime,
    active: AtomicBool,
    /// Claimed by whichever of start or register runs the initialize hook.
    initialized: AtomicBool,
}

impl MountedProvider {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The first path segment routed to this provider.
    pub fn mount_name(&self) -> &str {
        &self.mount_name
    }

    pub fn mount_point(&self) -> VfsPath {
        VfsPath::root().join(&self.mount_name)
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn mounted_at(&self) -> SystemTime {
        self.mounted_at
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// True for exactly one caller until [`Self::reset_initialized`].
    fn claim_initialize(&self) -> bool {
        !self.initialized.swap(true, Ordering::AcqRel)
    }

    fn reset_initialized(&self) {
        self.initialized.store(false, Ordering::Release);
    }

    fn info(&self) -> MountInfo {
        MountInfo {
            name: self.name.clone(),
            mount_point: self.mount_point(),
            mounted_at: self.mounted_at,
            active: self.is_active(),
            capabilities: self.provider.capabilities(),
        }
    }
}

impl fmt::Debug for MountedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountedProvider")
            .field("name", &self.name)
            .field("mount_name", &self.mount_name)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Snapshot of a mount, as reported by [`Daemon::providers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub name: String,
    pub mount_point: VfsPath,
    pub mounted_at: SystemTime,
    pub active: bool,
    pub capabilities: Capabilities,
}

/// A configured provider that could not be mounted.
#[derive(Debug)]
pub struct MountFailure {
    pub name: String,
    pub error: DaemonError,
    /// Package to install when the provider's module is not registered.
    pub hint: Option<String>,
}

/// Outcome of [`Daemon::mount_configured`].
#[derive(Debug, Default)]
pub struct MountReport {
    pub mounted: Vec<String>,
    pub failures: Vec<MountFailure>,
}

impl MountReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Routes operations to mounted providers.
///
/// Mounts are keyed by mount name. The table lock is never held across an
/// await: each operation clones the mount's `Arc` out first, so unregistering
/// a provider never cancels work already dispatched to it.
pub struct Daemon {
    mounts: RwLock<BTreeMap<String, Arc<MountedProvider>>>,
    state: Mutex<DaemonState>,
    mount_path: Mutex<Option<PathBuf>>,
}

impl fmt::Debug for Daemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mounts: Vec<String> = self.mounts.read().keys().cloned().collect();
        f.debug_struct("Daemon")
            .field("state", &self.state())
            .field("mounts", &mounts)
            .finish()
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    pub fn new() -> Self {
        Self {
            mounts: RwLock::new(BTreeMap::new()),
            state: Mutex::new(DaemonState::Unmounted),
            mount_path: Mutex::new(None),
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Bind `provider` under `mount_point` (default `/name`).
    ///
    /// Fails when the name or the mount segment is already taken. A provider
    /// registered while the daemon is starting or running is initialized
    /// immediately and stays inactive until that succeeds.
    #[tracing::instrument(skip(self, provider), name = "daemon.register")]
    pub async fn register_provider(
        &self,
        name: &str,
        provider: Arc<dyn Provider>,
        mount_point: Option<&str>,
    ) -> Result<(), DaemonError> {
        let mount_name = mount_segment(mount_point.unwrap_or(name))?;
        let started = self.state() != DaemonState::Unmounted;

        let mounted = Arc::new(MountedProvider {
            name: name.to_string(),
            mount_name: mount_name.clone(),
            provider,
            mounted_at: SystemTime::now(),
            active: AtomicBool::new(!started),
            initialized: AtomicBool::new(false),
        });

        {
            let mut mounts = self.mounts.write();
            if mounts.values().any(|m| m.name == name) {
                return Err(DaemonError::AlreadyRegistered(name.to_string()));
            }
            if mounts.contains_key(&mount_name) {
                return Err(DaemonError::AlreadyRegistered(mount_name));
            }
            mounts.insert(mount_name.clone(), Arc::clone(&mounted));
        }

        info!(name = %name, mount = %mounted.mount_point(), "Registered provider");
        if started {
            initialize_mount(&mounted).await;
        }
        Ok(())
    }

    /// Deactivate and remove the provider registered as `name`.
    ///
    /// Returns false, changing nothing, when no such provider is mounted.
    #[tracing::instrument(skip(self), name = "daemon.unregister")]
    pub fn unregister_provider(&self, name: &str) -> bool {
        let removed = {
            let mut mounts = self.mounts.write();
            let key = mounts
                .iter()
                .find(|(_, m)| m.name == name)
                .map(|(key, _)| key.clone());
            key.and_then(|key| mounts.remove(&key))
        };

        match removed {
            Some(mounted) => {
                mounted.set_active(false);
                info!(name = %name, "Unregistered provider");
                true
            }
            None => {
                debug!(name = %name, "Unregister of unknown provider");
                false
            }
        }
    }

    /// Every mount, active or not, ordered by mount name.
    pub fn providers(&self) -> Vec<MountInfo> {
        self.mounts.read().values().map(|m| m.info()).collect()
    }

    /// The provider registered as `name`.
    pub fn get_provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.mounts
            .read()
            .values()
            .find(|m| m.name == name)
            .map(|m| Arc::clone(&m.provider))
    }

    /// Instantiate and register every enabled auto-mount provider in `config`.
    ///
    /// Providers whose effective TTL is non-zero are wrapped in a
    /// [`CachingProvider`]. Failures are collected, never propagated.
    pub async fn mount_configured(
        &self,
        registry: &ProviderRegistry,
        config: &VfsdConfig,
    ) -> MountReport {
        let mut report = MountReport::default();

        for provider_config in config.auto_mount_providers() {
            let name = provider_config.name.clone();
            let module = provider_config.module.as_str();

            let provider = match registry.create_provider(module, &provider_config.config) {
                Ok(provider) => provider,
                Err(err) => {
                    let hint = match &err {
                        RegistryError::NotRegistered(_) => {
                            known_provider(module).map(|k| k.package.to_string())
                        }
                        _ => None,
                    };
                    warn!(name = %name, module = %module, error = %err, "Failed to create provider");
                    report.failures.push(MountFailure {
                        name,
                        error: err.into(),
                        hint,
                    });
                    continue;
                }
            };

            let ttl = provider_config.effective_ttl(&config.daemon);
            let provider: Arc<dyn Provider> = if ttl.is_zero() {
                provider
            } else {
                Arc::new(CachingProvider::with_capacity(
                    provider,
                    ttl,
                    config.daemon.max_cache_entries,
                ))
            };

            match self
                .register_provider(&name, provider, provider_config.mount_point.as_deref())
                .await
            {
                Ok(()) => report.mounted.push(name),
                Err(error) => {
                    warn!(name = %name, error = %error, "Failed to mount provider");
                    report.failures.push(MountFailure {
                        name,
                        error,
                        hint: None,
                    });
                }
            }
        }

        report
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn state(&self) -> DaemonState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == DaemonState::Running
    }

    /// Target an external mount adapter should attach to, while mounted.
    pub fn mount_path(&self) -> Option<PathBuf> {
        self.mount_path.lock().clone()
    }

    /// Record the mount target and start. A no-op when already started.
    pub async fn mount(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if self.state() != DaemonState::Unmounted {
            warn!(path = %path.display(), "Daemon already mounted");
            return;
        }
        *self.mount_path.lock() = Some(path.to_path_buf());
        self.start().await;
    }

    /// Initialize every registered provider and enter Running.
    ///
    /// A provider whose initialization fails is marked inactive; startup
    /// continues with the rest. Returns false, changing nothing, when the
    /// daemon was already started.
    #[tracing::instrument(skip(self), name = "daemon.start")]
    pub async fn start(&self) -> bool {
        {
            let mut state = self.state.lock();
            let current = *state;
            if current != DaemonState::Unmounted {
                warn!(state = %current, "Daemon already started");
                return false;
            }
            *state = DaemonState::Initializing;
        }

        for mounted in self.snapshot() {
            initialize_mount(&mounted).await;
        }

        *self.state.lock() = DaemonState::Running;
        let active = self.snapshot().iter().filter(|m| m.is_active()).count();
        info!(active, "Daemon running");
        true
    }

    /// Start, await `body`, then shut down.
    ///
    /// When the daemon was already started the body runs against it as is
    /// and the daemon is left running for whoever started it.
    pub async fn run<F: Future>(&self, body: F) -> F::Output {
        let started = self.start().await;
        let output = body.await;
        if started {
            self.shutdown().await;
        }
        output
    }

    /// Clear the mount target and return to Unmounted.
    pub fn unmount(&self) {
        let path = self.mount_path.lock().take();
        *self.state.lock() = DaemonState::Unmounted;
        match path {
            Some(path) => info!(path = %path.display(), "Daemon unmounted"),
            None => info!("Daemon stopped"),
        }
    }

    /// Run every active provider's shutdown hook, then unmount.
    ///
    /// Each provider is inactive once its hook has run, so nothing more is
    /// routed to it until the next start. Hook failures are logged.
    /// Operations already dispatched are not cancelled.
    #[tracing::instrument(skip(self), name = "daemon.shutdown")]
    pub async fn shutdown(&self) {
        for mounted in self.snapshot() {
            if mounted.is_active() {
                if let Err(err) = mounted.provider.shutdown().await {
                    warn!(name = %mounted.name, error = %err, "Provider shutdown failed");
                }
            }
            mounted.set_active(false);
            mounted.reset_initialized();
        }
        self.unmount();
    }

    /// Run refresh hooks: one provider by name, or every active provider.
    pub async fn refresh(&self, name: Option<&str>) -> VfsResult<()> {
        match name {
            Some(name) => {
                let mounted = self
                    .snapshot()
                    .into_iter()
                    .find(|m| m.name == name && m.is_active())
                    .ok_or_else(|| VfsError::not_found(VfsPath::root().join(name)))?;
                mounted.provider.refresh().await
            }
            None => {
                for mounted in self.snapshot().into_iter().filter(|m| m.is_active()) {
                    if let Err(err) = mounted.provider.refresh().await {
                        warn!(name = %mounted.name, error = %err, "Provider refresh failed");
                    }
                }
                Ok(())
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<MountedProvider>> {
        self.mounts.read().values().cloned().collect()
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// The active mount for `path` and the provider-relative remainder.
    ///
    /// Fails with NotFound at the root, and for unknown or inactive mounts.
    pub fn resolve(&self, path: &VfsPath) -> VfsResult<(Arc<MountedProvider>, VfsPath)> {
        let mount_name = path
            .provider_name()
            .ok_or_else(|| VfsError::not_found(path))?;
        let mounted = self
            .mounts
            .read()
            .get(mount_name)
            .cloned()
            .filter(|m| m.is_active())
            .ok_or_else(|| VfsError::not_found(path))?;
        Ok((mounted, path.provider_relative_path()))
    }

    /// Resolve for an operation gated on `capability`.
    fn resolve_gated(
        &self,
        path: &VfsPath,
        capability: Capabilities,
        operation: &str,
    ) -> VfsResult<(Arc<MountedProvider>, VfsPath)> {
        if path.is_empty() {
            return Err(VfsError::permission_denied(path, operation));
        }
        let (mounted, relative) = self.resolve(path)?;
        require(&mounted, capability, path, operation)?;
        Ok((mounted, relative))
    }

    fn root_listing(&self) -> Vec<Node> {
        self.snapshot()
            .into_iter()
            .filter(|m| m.is_active())
            .map(|m| {
                Node::directory(m.mount_name.clone())
                    .with_mtime(m.mounted_at)
                    .with_data("provider", m.name.clone())
            })
            .collect()
    }

    // ========================================================================
    // Reading
    // ========================================================================

    pub async fn get_node(&self, path: impl Into<VfsPath>) -> VfsResult<Node> {
        let path = path.into().to_absolute();
        trace!(path = %path, "get_node");
        if path.is_empty() {
            return Ok(Node::directory(""));
        }
        let (mounted, relative) = self.resolve(&path)?;
        mounted.provider.get_node(&relative).await
    }

    pub async fn list_directory(&self, path: impl Into<VfsPath>) -> VfsResult<DirStream> {
        let path = path.into().to_absolute();
        trace!(path = %path, "list_directory");
        if path.is_empty() {
            return Ok(listing(self.root_listing()));
        }
        let (mounted, relative) = self.resolve(&path)?;
        mounted.provider.list_directory(&relative).await
    }

    pub async fn read_file(
        &self,
        path: impl Into<VfsPath>,
        offset: u64,
        size: Option<u64>,
    ) -> VfsResult<Vec<u8>> {
        let path = path.into().to_absolute();
        trace!(path = %path, offset, ?size, "read_file");
        if path.is_empty() {
            return Err(VfsError::is_a_directory(&path));
        }
        let (mounted, relative) = self.resolve(&path)?;
        mounted.provider.read_file(&relative, offset, size).await
    }

    pub async fn read_symlink(&self, path: impl Into<VfsPath>) -> VfsResult<String> {
        let path = path.into().to_absolute();
        let (mounted, relative) = self.resolve(&path)?;
        mounted.provider.read_symlink(&relative).await
    }

    pub async fn get_xattr(&self, path: impl Into<VfsPath>, name: &str) -> VfsResult<Vec<u8>> {
        let path = path.into().to_absolute();
        let (mounted, relative) = self.resolve(&path)?;
        mounted.provider.get_xattr(&relative, name).await
    }

    pub async fn list_xattr(&self, path: impl Into<VfsPath>) -> VfsResult<Vec<String>> {
        let path = path.into().to_absolute();
        if path.is_empty() {
            return Ok(Vec::new());
        }
        let (mounted, relative) = self.resolve(&path)?;
        mounted.provider.list_xattr(&relative).await
    }

    // ========================================================================
    // Writing
    // ========================================================================

    pub async fn write_file(
        &self,
        path: impl Into<VfsPath>,
        data: &[u8],
        offset: u64,
    ) -> VfsResult<u64> {
        let path = path.into().to_absolute();
        trace!(path = %path, offset, len = data.len(), "write_file");
        let (mounted, relative) = self.resolve_gated(&path, Capabilities::WRITE, "write")?;
        mounted.provider.write_file(&relative, data, offset).await
    }

    pub async fn create_file(&self, path: impl Into<VfsPath>, mode: u32) -> VfsResult<Node> {
        let path = path.into().to_absolute();
        let (mounted, relative) = self.resolve_gated(&path, Capabilities::CREATE, "create")?;
        mounted.provider.create_file(&relative, mode).await
    }

    pub async fn create_directory(&self, path: impl Into<VfsPath>, mode: u32) -> VfsResult<Node> {
        let path = path.into().to_absolute();
        let (mounted, relative) = self.resolve_gated(&path, Capabilities::CREATE, "mkdir")?;
        mounted.provider.create_directory(&relative, mode).await
    }

    /// Create a file or directory.
    pub async fn create(
        &self,
        path: impl Into<VfsPath>,
        is_directory: bool,
        mode: u32,
    ) -> VfsResult<Node> {
        if is_directory {
            self.create_directory(path, mode).await
        } else {
            self.create_file(path, mode).await
        }
    }

    pub async fn delete(&self, path: impl Into<VfsPath>) -> VfsResult<()> {
        let path = path.into().to_absolute();
        let (mounted, relative) = self.resolve_gated(&path, Capabilities::DELETE, "delete")?;
        mounted.provider.delete(&relative).await
    }

    /// Rename within one provider.
    ///
    /// Endpoints on different provider instances fail with an I/O error and
    /// neither provider is called.
    pub async fn rename(&self, old: impl Into<VfsPath>, new: impl Into<VfsPath>) -> VfsResult<()> {
        let old = old.into().to_absolute();
        let new = new.into().to_absolute();
        trace!(old = %old, new = %new, "rename");
        if old.is_empty() || new.is_empty() {
            return Err(VfsError::permission_denied(&old, "rename"));
        }

        let (source, old_relative) = self.resolve(&old)?;
        let (target, new_relative) = self.resolve(&new)?;
        if !std::ptr::addr_eq(Arc::as_ptr(&source.provider), Arc::as_ptr(&target.provider)) {
            return Err(VfsError::io_at("cannot rename across providers", &old));
        }
        require(&source, Capabilities::RENAME, &old, "rename")?;

        source.provider.rename(&old_relative, &new_relative).await
    }

    pub async fn create_symlink(&self, path: impl Into<VfsPath>, target: &str) -> VfsResult<Node> {
        let path = path.into().to_absolute();
        let (mounted, relative) = self.resolve_gated(&path, Capabilities::SYMLINK, "symlink")?;
        mounted.provider.create_symlink(&relative, target).await
    }

    pub async fn set_xattr(
        &self,
        path: impl Into<VfsPath>,
        name: &str,
        value: &[u8],
    ) -> VfsResult<()> {
        let path = path.into().to_absolute();
        let (mounted, relative) = self.resolve_gated(&path, Capabilities::XATTR, "setxattr")?;
        mounted.provider.set_xattr(&relative, name, value).await
    }
}

/// Normalize a mount point to its single segment.
fn mount_segment(mount_point: &str) -> Result<String, DaemonError> {
    let path = VfsPath::parse(mount_point);
    match path.segments() {
        [segment] => Ok(segment.clone()),
        _ => Err(DaemonError::InvalidMountPoint(mount_point.to_string())),
    }
}

fn require(
    mounted: &MountedProvider,
    capability: Capabilities,
    path: &VfsPath,
    operation: &str,
) -> VfsResult<()> {
    if mounted.provider.supports(capability) {
        Ok(())
    } else {
        debug!(name = %mounted.name, capability = %capability, "Capability missing");
        Err(VfsError::permission_denied(path, operation))
    }
}

async fn initialize_mount(mounted: &MountedProvider) {
    if !mounted.claim_initialize() {
        return;
    }
    match mounted.provider.initialize().await {
        Ok(()) => {
            mounted.set_active(true);
            debug!(name = %mounted.name, "Provider initialized");
        }
        Err(err) => {
            mounted.set_active(false);
            error!(name = %mounted.name, error = %err, "Provider failed to initialize, marking inactive");
        }
    }
}
