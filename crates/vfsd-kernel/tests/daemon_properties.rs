//! End-to-end properties of the daemon, cache, handles and discovery.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use vfsd_kernel::{
    Capabilities, ConfigMap, Daemon, DaemonState, DirStream, MemoryProvider, Node, Page,
    PluginCatalog, Provider, ProviderBase, ProviderConfig, ProviderFactory, ProviderInfo,
    ProviderRegistry, TtlCache, VfsError, VfsPath, VfsResult, VfsdConfig, collect_listing,
    listing, paginated,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Counts calls into the mutating operations it would otherwise accept.
struct Counting {
    base: ProviderBase,
    writes: AtomicUsize,
    renames: AtomicUsize,
    fail_init: bool,
}

impl Counting {
    fn new(name: &str, capabilities: Capabilities) -> Arc<Self> {
        Arc::new(Self {
            base: ProviderBase::new(name, capabilities),
            writes: AtomicUsize::new(0),
            renames: AtomicUsize::new(0),
            fail_init: false,
        })
    }

    fn failing_init(name: &str) -> Arc<Self> {
        Arc::new(Self {
            base: ProviderBase::new(name, Capabilities::FULL),
            writes: AtomicUsize::new(0),
            renames: AtomicUsize::new(0),
            fail_init: true,
        })
    }
}

#[async_trait]
impl Provider for Counting {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.base.capabilities()
    }

    async fn get_node(&self, path: &VfsPath) -> VfsResult<Node> {
        Ok(Node::file(path.file_name().unwrap_or(""), 0))
    }

    async fn list_directory(&self, _path: &VfsPath) -> VfsResult<DirStream> {
        Ok(listing(vec![Node::file("only", 0)]))
    }

    async fn read_file(&self, _path: &VfsPath, _offset: u64, _size: Option<u64>) -> VfsResult<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn write_file(&self, _path: &VfsPath, data: &[u8], _offset: u64) -> VfsResult<u64> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(data.len() as u64)
    }

    async fn rename(&self, _old: &VfsPath, _new: &VfsPath) -> VfsResult<()> {
        self.renames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn initialize(&self) -> VfsResult<()> {
        if self.fail_init {
            Err(VfsError::io("backend unreachable"))
        } else {
            Ok(())
        }
    }
}

fn memory(name: &str) -> Arc<MemoryProvider> {
    let mem = MemoryProvider::new(name);
    mem.seed_file("x", b"payload".to_vec());
    Arc::new(mem)
}

#[test]
fn test_path_round_trip() {
    for raw in ["/github", "/github/acme", "/slack/general/2024-01-01/msg.json", "/a/b/c/d/e"] {
        let path = VfsPath::parse(raw);
        let provider = path.provider_name().unwrap();
        let rebuilt = VfsPath::from_provider(provider, &path.provider_relative_path());
        assert_eq!(rebuilt, path, "round trip of {raw}");
        assert_eq!(rebuilt.to_string(), raw);
    }
}

#[test]
fn test_handles_strictly_increase() {
    let base = ProviderBase::new("mem", Capabilities::READ_ONLY);
    let path = VfsPath::parse("file");
    let handles: Vec<u64> = (0..64)
        .map(|_| base.allocate_handle(path.clone()).as_u64())
        .collect();

    assert_eq!(handles[0], 1);
    assert!(handles.windows(2).all(|w| w[0] < w[1]));

    // released handles are never handed out again
    let last = base.allocate_handle(path.clone());
    assert!(base.release_handle(last));
    assert!(base.allocate_handle(path).as_u64() > last.as_u64());
}

#[tokio::test]
async fn test_capability_gate_precedes_backend_call() {
    init_tracing();
    let stub = Counting::new("ro", Capabilities::READ_ONLY);
    let daemon = Daemon::new();
    daemon.register_provider("ro", stub.clone(), None).await.unwrap();

    let err = daemon.write_file("/ro/file", b"data", 0).await.unwrap_err();
    assert!(matches!(err, VfsError::PermissionDenied { ref operation, .. } if operation == "write"));
    assert_eq!(stub.writes.load(Ordering::SeqCst), 0);

    let err = daemon.rename("/ro/a", "/ro/b").await.unwrap_err();
    assert!(matches!(err, VfsError::PermissionDenied { .. }));
    assert_eq!(stub.renames.load(Ordering::SeqCst), 0);

    // reads are never gated
    assert!(daemon.get_node("/ro/file").await.is_ok());
}

#[tokio::test]
async fn test_capability_present_reaches_backend() {
    let stub = Counting::new("rw", Capabilities::READ_WRITE | Capabilities::RENAME);
    let daemon = Daemon::new();
    daemon.register_provider("rw", stub.clone(), None).await.unwrap();

    assert_eq!(daemon.write_file("/rw/file", b"data", 0).await.unwrap(), 4);
    daemon.rename("/rw/a", "/rw/b").await.unwrap();
    assert_eq!(stub.writes.load(Ordering::SeqCst), 1);
    assert_eq!(stub.renames.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_provider_errors_pass_through() {
    let daemon = Daemon::new();
    daemon.register_provider("mem", memory("mem"), None).await.unwrap();

    let err = daemon.read_file("/mem/missing", 0, None).await.unwrap_err();
    assert!(matches!(err, VfsError::NotFound(_)));

    daemon.create_directory("/mem/dir", 0o755).await.unwrap();
    daemon.create_file("/mem/dir/f", 0o644).await.unwrap();
    let err = daemon.delete("/mem/dir").await.unwrap_err();
    assert!(matches!(err, VfsError::DirectoryNotEmpty(_)));
}

#[tokio::test(start_paused = true)]
async fn test_cache_ttl_boundary() {
    let ttl = Duration::from_secs(30);
    let cache: TtlCache<String> = TtlCache::with_ttl(ttl);
    let key = TtlCache::<String>::cache_key("node", "/mem/x");

    cache.insert(key.clone(), "v".to_string());
    assert_eq!(cache.get(&key).as_deref(), Some("v"));

    tokio::time::advance(ttl + Duration::from_millis(1)).await;
    assert_eq!(cache.get(&key), None);
    assert_eq!(cache.get(&key), None);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_inactive_provider_is_isolated() {
    init_tracing();
    let daemon = Daemon::new();
    daemon
        .register_provider("a", Counting::failing_init("a"), None)
        .await
        .unwrap();
    daemon.register_provider("b", memory("b"), None).await.unwrap();

    daemon.mount("/tmp/vfsd-test").await;
    assert_eq!(daemon.state(), DaemonState::Running);

    assert_eq!(daemon.read_file("/b/x", 0, None).await.unwrap(), b"payload");
    assert!(matches!(
        daemon.get_node("/a/anything").await.unwrap_err(),
        VfsError::NotFound(_)
    ));

    let infos = daemon.providers();
    let a = infos.iter().find(|m| m.name == "a").unwrap();
    assert!(!a.active);

    let root = collect_listing(daemon.list_directory("/").await.unwrap()).await.unwrap();
    let names: Vec<_> = root.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, ["b"]);

    daemon.shutdown().await;
    assert_eq!(daemon.state(), DaemonState::Unmounted);
}

#[tokio::test]
async fn test_cross_provider_rename_rejected() {
    let a = Counting::new("a", Capabilities::FULL);
    let b = Counting::new("b", Capabilities::FULL);
    let daemon = Daemon::new();
    daemon.register_provider("a", a.clone(), None).await.unwrap();
    daemon.register_provider("b", b.clone(), None).await.unwrap();

    let err = daemon.rename("/a/x", "/b/y").await.unwrap_err();
    assert!(matches!(err, VfsError::Io { ref message, .. } if message == "cannot rename across providers"));
    assert_eq!(a.renames.load(Ordering::SeqCst), 0);
    assert_eq!(b.renames.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cross_provider_rename_checked_before_capability() {
    let a = Counting::new("a", Capabilities::READ_ONLY);
    let b = Counting::new("b", Capabilities::FULL);
    let daemon = Daemon::new();
    daemon.register_provider("a", a, None).await.unwrap();
    daemon.register_provider("b", b, None).await.unwrap();

    let err = daemon.rename("/a/x", "/b/y").await.unwrap_err();
    assert!(matches!(err, VfsError::Io { .. }));
}

#[tokio::test]
async fn test_root_listing_reflects_active_mounts() {
    let daemon = Daemon::new();
    daemon.register_provider("a", memory("a"), None).await.unwrap();
    daemon.register_provider("b", memory("b"), None).await.unwrap();
    assert!(daemon.unregister_provider("a"));

    let root = collect_listing(daemon.list_directory("/").await.unwrap()).await.unwrap();
    assert_eq!(root.len(), 1);
    assert_eq!(root[0].name, "b");
    assert!(root[0].is_directory());
}

#[tokio::test]
async fn test_unregister_unknown_is_noop() {
    let daemon = Daemon::new();
    daemon.register_provider("b", memory("b"), None).await.unwrap();
    let before = daemon.providers();

    assert!(!daemon.unregister_provider("never-registered"));
    assert_eq!(daemon.providers(), before);
}

#[tokio::test]
async fn test_inflight_operation_survives_unregister() {
    let daemon = Daemon::new();
    let mem = memory("mem");
    daemon.register_provider("mem", mem, None).await.unwrap();

    let (mounted, relative) = daemon.resolve(&VfsPath::parse("/mem/x")).unwrap();
    assert!(daemon.unregister_provider("mem"));
    assert!(!mounted.is_active());

    // the resolved provider is still usable by whoever holds it
    assert_eq!(mounted.provider().read_file(&relative, 0, None).await.unwrap(), b"payload");
    assert!(daemon.get_node("/mem/x").await.is_err());
}

/// Serves a listing in pages of two, counting fetches.
struct Paged {
    fetches: Arc<AtomicUsize>,
}

#[async_trait]
impl Provider for Paged {
    fn name(&self) -> &str {
        "paged"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ_ONLY
    }

    async fn get_node(&self, _path: &VfsPath) -> VfsResult<Node> {
        Ok(Node::directory(""))
    }

    async fn list_directory(&self, _path: &VfsPath) -> VfsResult<DirStream> {
        let fetches = Arc::clone(&self.fetches);
        Ok(paginated(move |cursor: Option<String>| {
            let fetches = Arc::clone(&fetches);
            async move {
                let page = fetches.fetch_add(1, Ordering::SeqCst);
                let nodes = vec![
                    Node::file(format!("item-{}", page * 2), 0),
                    Node::file(format!("item-{}", page * 2 + 1), 0),
                ];
                Ok(match cursor {
                    None => Page::new(nodes, Some("p2".to_string())),
                    Some(_) => Page::last(nodes),
                })
            }
        }))
    }

    async fn read_file(&self, path: &VfsPath, _offset: u64, _size: Option<u64>) -> VfsResult<Vec<u8>> {
        Err(VfsError::is_a_directory(path))
    }
}

#[tokio::test]
async fn test_listing_is_pulled_lazily_through_daemon() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let daemon = Daemon::new();
    daemon
        .register_provider("paged", Arc::new(Paged { fetches: Arc::clone(&fetches) }), None)
        .await
        .unwrap();

    let mut entries = daemon.list_directory("/paged").await.unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 0);

    let first = entries.next().await.unwrap().unwrap();
    assert_eq!(first.name, "item-0");
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    let rest: Vec<_> = entries.collect().await;
    assert_eq!(rest.len(), 3);
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_manifest_preset_mounts_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let preset = dir.path().join("team-notes");
    std::fs::create_dir(&preset).unwrap();
    std::fs::write(
        preset.join("provider.toml"),
        r#"
description = "Shared team notes"
extends = "memory"

[defaults]
read_only = true
"#,
    )
    .unwrap();

    let mut registry = ProviderRegistry::new();
    registry.register::<MemoryProvider>(ProviderInfo::new("memory"));
    let report = registry.discover_local_providers(Some(&[PathBuf::from(dir.path())]));
    assert_eq!(report.found, ["team-notes"]);

    let config = VfsdConfig::from_toml_str(
        r#"
[providers.notes]
module = "team-notes"
auto_mount = true
cache_ttl_secs = 0

[providers.notes.config]
name = "notes"
"#,
    )
    .unwrap();

    let daemon = Daemon::new();
    let mounted = daemon.mount_configured(&registry, &config).await;
    assert!(mounted.is_clean());

    let info = &daemon.providers()[0];
    assert_eq!(info.name, "notes");
    assert!(!info.capabilities.contains(Capabilities::WRITE));
    assert!(matches!(
        daemon.create_file("/notes/new", 0o644).await.unwrap_err(),
        VfsError::PermissionDenied { .. }
    ));
}

fn load_good() -> anyhow::Result<(ProviderInfo, ProviderFactory)> {
    let factory: ProviderFactory = Arc::new(|_config: &ConfigMap| {
        let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new("good"));
        Ok(provider)
    });
    Ok((ProviderInfo::new("ignored"), factory))
}

fn load_bad() -> anyhow::Result<(ProviderInfo, ProviderFactory)> {
    anyhow::bail!("import failed")
}

#[test]
fn test_discovery_failure_leaves_registry_untouched() {
    let catalog = PluginCatalog::new()
        .with_entry_point("vfsd.providers", "good", load_good)
        .with_entry_point("vfsd.providers", "bad", load_bad);

    let mut registry = ProviderRegistry::new();
    let report = registry.discover_providers(&catalog, None);

    assert_eq!(report.found, ["good"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].candidate, "bad");
    assert!(registry.contains("good"));
    assert!(!registry.contains("bad"));
    assert_eq!(registry.len(), 1);

    let config = ProviderConfig::new("good", "good").auto_mount(true);
    let provider = registry.create_provider(&config.module, &config.config).ok().unwrap();
    assert_eq!(provider.name(), "good");
}
