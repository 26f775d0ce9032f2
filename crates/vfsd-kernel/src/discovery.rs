//! Provider discovery.
//!
//! Providers reach a registry in two ways besides direct registration:
//!
//! - **Plugins** listed in a [`PluginCatalog`], found by three independent
//!   passes: entry points in the `vfsd.providers` group, packages following
//!   the `vfs-*` / `vfs_*` naming convention, and sub-packages of an
//!   explicitly named package.
//! - **Local manifests**: `provider.toml` files in per-provider
//!   subdirectories of a search path, each describing a preset over an
//!   already registered provider.
//!
//! Every candidate registers into a staging registry first. Only a candidate
//! that succeeds completely is merged, so a failure never leaves partial
//! registrations behind.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{ConfigMap, providers_dir};
use crate::registry::{ProviderFactory, ProviderInfo, ProviderRegistry, RegistryError};

/// Entry point group scanned by the first discovery pass.
pub const ENTRY_POINT_GROUP: &str = "vfsd.providers";

/// Manifest file name inside a local provider directory.
pub const MANIFEST_FILE: &str = "provider.toml";

/// Loads the provider behind an entry point.
pub type EntryPointLoader = fn() -> anyhow::Result<(ProviderInfo, ProviderFactory)>;

/// A named, lazily loaded provider in an entry point group.
#[derive(Clone)]
pub struct EntryPoint {
    pub group: String,
    pub name: String,
    pub load: EntryPointLoader,
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint")
            .field("group", &self.group)
            .field("name", &self.name)
            .finish()
    }
}

/// A provider package that registers its providers on request.
pub trait ProviderPlugin: Send + Sync {
    /// Package name. `vfs-*` / `vfs_*` names take part in the naming
    /// convention pass; `parent::child` names are sub-packages of `parent`.
    fn package(&self) -> &str;

    fn register(&self, registry: &mut ProviderRegistry) -> anyhow::Result<()>;
}

/// Everything installed that discovery may look at.
#[derive(Default, Clone)]
pub struct PluginCatalog {
    entry_points: Vec<EntryPoint>,
    packages: Vec<Arc<dyn ProviderPlugin>>,
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("entry_points", &self.entry_points)
            .field(
                "packages",
                &self.packages.iter().map(|p| p.package()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry_point(
        mut self,
        group: impl Into<String>,
        name: impl Into<String>,
        load: EntryPointLoader,
    ) -> Self {
        self.entry_points.push(EntryPoint {
            group: group.into(),
            name: name.into(),
            load,
        });
        self
    }

    pub fn with_package(mut self, plugin: impl ProviderPlugin + 'static) -> Self {
        self.packages.push(Arc::new(plugin));
        self
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    pub fn packages(&self) -> impl Iterator<Item = &dyn ProviderPlugin> {
        self.packages.iter().map(|p| p.as_ref())
    }
}

/// A candidate that could not be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFailure {
    pub candidate: String,
    pub error: String,
}

/// Outcome of one or more discovery passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Names discovered, in discovery order, without duplicates.
    pub found: Vec<String>,
    pub failures: Vec<DiscoveryFailure>,
}

impl DiscoveryReport {
    fn record_found(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.found.contains(&name) {
            self.found.push(name);
        }
    }

    fn record_failure(&mut self, candidate: impl Into<String>, error: impl fmt::Display) {
        let candidate = candidate.into();
        let error = format!("{error:#}");
        warn!(candidate = %candidate, error = %error, "Provider discovery candidate failed");
        self.failures.push(DiscoveryFailure { candidate, error });
    }

    /// Fold `other` into `self`, keeping `found` de-duplicated.
    pub fn merge(&mut self, other: DiscoveryReport) {
        for name in other.found {
            self.record_found(name);
        }
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Convention pass: `vfs-slack` / `vfs_slack` → `slack`.
fn convention_name(package: &str) -> Option<&str> {
    package
        .strip_prefix("vfs-")
        .or_else(|| package.strip_prefix("vfs_"))
        .filter(|name| !name.is_empty())
}

/// A local provider manifest (`provider.toml`).
///
/// ```toml
/// name = "team-notes"          # defaults to the directory name
/// description = "Shared notes"
/// extends = "memory"           # registered provider to build on
/// required_config = []
/// optional_config = ["read_only"]
///
/// [defaults]
/// name = "team-notes"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_extends")]
    pub extends: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub required_config: Vec<String>,
    #[serde(default)]
    pub optional_config: Vec<String>,
    /// Config values applied underneath whatever the user supplies.
    #[serde(default)]
    pub defaults: ConfigMap,
}

fn default_extends() -> String {
    "memory".to_string()
}

impl ProviderManifest {
    /// Parse the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let manifest_error = |message: String| RegistryError::Manifest {
            path: path.to_path_buf(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| manifest_error(e.to_string()))?;
        toml::from_str(&text).map_err(|e| manifest_error(e.to_string()))
    }
}

impl ProviderRegistry {
    /// Run all three plugin passes and merge their reports.
    pub fn discover_providers(
        &mut self,
        catalog: &PluginCatalog,
        package: Option<&str>,
    ) -> DiscoveryReport {
        let mut report = self.discover_entry_points(catalog);
        report.merge(self.discover_by_convention(catalog));
        if let Some(package) = package {
            report.merge(self.discover_package(catalog, package));
        }
        info!(
            found = ?report.found,
            failures = report.failures.len(),
            "Provider discovery complete"
        );
        report
    }

    /// Pass 1: entry points in [`ENTRY_POINT_GROUP`]. The entry point name
    /// becomes the registered provider name.
    pub fn discover_entry_points(&mut self, catalog: &PluginCatalog) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for entry in catalog
            .entry_points()
            .iter()
            .filter(|e| e.group == ENTRY_POINT_GROUP)
        {
            match (entry.load)() {
                Ok((info, factory)) => {
                    let info = ProviderInfo {
                        name: entry.name.clone(),
                        ..info
                    };
                    let mut staging = ProviderRegistry::new();
                    staging.register_factory(info, move |config: &ConfigMap| factory(config));
                    self.merge(staging);
                    report.record_found(entry.name.clone());
                }
                Err(e) => report.record_failure(&entry.name, e),
            }
        }
        report
    }

    /// Pass 2: packages named `vfs-*` / `vfs_*`. The reported name is the
    /// package name without its prefix.
    pub fn discover_by_convention(&mut self, catalog: &PluginCatalog) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for plugin in catalog.packages() {
            let Some(name) = convention_name(plugin.package()) else {
                continue;
            };
            self.stage_plugin(plugin, name, &mut report);
        }
        report
    }

    /// Pass 3: direct sub-packages `"{package}::{sub}"` of `package`. The
    /// reported name is `sub`.
    pub fn discover_package(&mut self, catalog: &PluginCatalog, package: &str) -> DiscoveryReport {
        let prefix = format!("{package}::");
        let mut report = DiscoveryReport::default();
        for plugin in catalog.packages() {
            let Some(sub) = plugin.package().strip_prefix(&prefix) else {
                continue;
            };
            if sub.is_empty() || sub.contains("::") {
                continue;
            }
            self.stage_plugin(plugin, sub, &mut report);
        }
        report
    }

    fn stage_plugin(&mut self, plugin: &dyn ProviderPlugin, name: &str, report: &mut DiscoveryReport) {
        let mut staging = ProviderRegistry::new();
        match plugin.register(&mut staging) {
            Ok(()) => {
                let merged = self.merge(staging);
                debug!(package = %plugin.package(), providers = ?merged, "Registered plugin package");
                report.record_found(name);
            }
            Err(e) => report.record_failure(plugin.package(), e),
        }
    }

    /// Register presets from `provider.toml` manifests.
    ///
    /// Each directory in `search_paths` (default: [`providers_dir`]) is
    /// scanned one level deep. Missing directories are skipped; a manifest
    /// that fails to parse, or extends a provider that is not registered,
    /// is reported and skipped.
    pub fn discover_local_providers(&mut self, search_paths: Option<&[PathBuf]>) -> DiscoveryReport {
        let defaults: Vec<PathBuf> = providers_dir().into_iter().collect();
        let search_paths = search_paths.unwrap_or(&defaults);

        let mut report = DiscoveryReport::default();
        for dir in search_paths {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(path = %dir.display(), error = %e, "Skipping provider search path");
                    continue;
                }
            };
            let mut candidates: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.join(MANIFEST_FILE).is_file())
                .collect();
            candidates.sort();

            for candidate in candidates {
                let dir_name = candidate
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                match self.register_manifest(&candidate.join(MANIFEST_FILE), &dir_name) {
                    Ok(name) => report.record_found(name),
                    Err(e) => report.record_failure(candidate.display().to_string(), e),
                }
            }
        }
        report
    }

    fn register_manifest(&mut self, path: &Path, dir_name: &str) -> Result<String, RegistryError> {
        let manifest = ProviderManifest::load(path)?;
        let name = manifest.name.clone().unwrap_or_else(|| dir_name.to_string());

        let (Some(base_info), Some(base)) =
            (self.get_info(&manifest.extends).cloned(), self.factory(&manifest.extends))
        else {
            return Err(RegistryError::Manifest {
                path: path.to_path_buf(),
                message: format!("extends unknown provider {}", manifest.extends),
            });
        };

        let mut info = ProviderInfo::new(&name)
            .with_type_name(format!("{} preset", base_info.type_name))
            .with_description(manifest.description.clone())
            .with_required(manifest.required_config.clone())
            .with_optional(manifest.optional_config.clone());
        if let Some(version) = &manifest.version {
            info = info.with_version(version.clone());
        }

        let defaults = manifest.defaults;
        let extends = manifest.extends;
        let mut staging = ProviderRegistry::new();
        staging.register_factory(info, move |config: &ConfigMap| {
            let mut merged = defaults.clone();
            merged.extend(config.iter().map(|(k, v)| (k.clone(), v.clone())));
            let missing = base_info.missing_config(&merged);
            if !missing.is_empty() {
                anyhow::bail!(
                    "missing required config for {}: {}",
                    extends,
                    missing.join(", ")
                );
            }
            base(&merged)
        });
        self.merge(staging);
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;
    use crate::providers::MemoryProvider;
    use crate::registry::FromConfig;
    use vfsd_types::MetaValue;

    struct Plugin {
        package: &'static str,
        provides: &'static [&'static str],
        fail: bool,
    }

    impl ProviderPlugin for Plugin {
        fn package(&self) -> &str {
            self.package
        }

        fn register(&self, registry: &mut ProviderRegistry) -> anyhow::Result<()> {
            for name in self.provides {
                registry.register::<MemoryProvider>(ProviderInfo::new(*name));
            }
            if self.fail {
                anyhow::bail!("import failed");
            }
            Ok(())
        }
    }

    fn plugin(package: &'static str, provides: &'static [&'static str]) -> Plugin {
        Plugin {
            package,
            provides,
            fail: false,
        }
    }

    fn load_memory() -> anyhow::Result<(ProviderInfo, ProviderFactory)> {
        let factory: ProviderFactory = Arc::new(|config: &ConfigMap| {
            let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::from_config(config)?);
            Ok(provider)
        });
        Ok((ProviderInfo::new("ignored"), factory))
    }

    fn load_broken() -> anyhow::Result<(ProviderInfo, ProviderFactory)> {
        anyhow::bail!("missing native library")
    }

    #[test]
    fn test_entry_points() {
        let catalog = PluginCatalog::new()
            .with_entry_point(ENTRY_POINT_GROUP, "scratch", load_memory)
            .with_entry_point("other.group", "elsewhere", load_memory)
            .with_entry_point(ENTRY_POINT_GROUP, "broken", load_broken);

        let mut registry = ProviderRegistry::new();
        let report = registry.discover_entry_points(&catalog);
        assert_eq!(report.found, ["scratch"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].candidate, "broken");
        assert!(registry.contains("scratch"));
        assert!(!registry.contains("elsewhere"));
    }

    #[test]
    fn test_naming_convention() {
        let catalog = PluginCatalog::new()
            .with_package(plugin("vfs-slack", &["slack"]))
            .with_package(plugin("vfs_linear", &["linear"]))
            .with_package(plugin("unrelated", &["nope"]))
            .with_package(plugin("vfs-", &["empty"]));

        let mut registry = ProviderRegistry::new();
        let report = registry.discover_by_convention(&catalog);
        assert_eq!(report.found, ["slack", "linear"]);
        assert!(report.is_clean());
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn test_failed_plugin_leaves_no_partial_state() {
        let catalog = PluginCatalog::new().with_package(Plugin {
            package: "vfs-half",
            provides: &["half-a", "half-b"],
            fail: true,
        });

        let mut registry = ProviderRegistry::new();
        let report = registry.discover_by_convention(&catalog);
        assert!(report.found.is_empty());
        assert_eq!(report.failures[0].candidate, "vfs-half");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_explicit_package_and_merged_report() {
        let catalog = PluginCatalog::new()
            .with_entry_point(ENTRY_POINT_GROUP, "slack", load_memory)
            .with_package(plugin("vfs-slack", &["slack"]))
            .with_package(plugin("acme::tickets", &["tickets"]))
            .with_package(plugin("acme::chat", &["chat"]))
            .with_package(plugin("acme::chat::legacy", &["legacy"]))
            .with_package(plugin("other::wiki", &["wiki"]));

        let mut registry = ProviderRegistry::new();
        let report = registry.discover_providers(&catalog, Some("acme"));
        assert_eq!(report.found, ["slack", "tickets", "chat"]);
        assert!(registry.contains("chat"));
        assert!(!registry.contains("wiki"));
        assert!(!registry.contains("legacy"));

        let without = ProviderRegistry::new().discover_providers(&catalog, None);
        assert_eq!(without.found, ["slack"]);
    }

    fn write_manifest(root: &Path, dir: &str, body: &str) {
        let dir = root.join(dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), body).unwrap();
    }

    fn base_registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register::<MemoryProvider>(ProviderInfo::new("memory"));
        registry
    }

    #[test]
    fn test_local_manifest_preset_merges_defaults() {
        let root = tempfile::tempdir().unwrap();
        write_manifest(
            root.path(),
            "team-notes",
            r#"
description = "Shared notes"
optional_config = ["name"]

[defaults]
name = "team-notes"
read_only = true
"#,
        );

        let mut registry = base_registry();
        let report = registry.discover_local_providers(Some(&[root.path().to_path_buf()]));
        assert_eq!(report.found, ["team-notes"]);

        let info = registry.get_info("team-notes").unwrap();
        assert_eq!(info.description, "Shared notes");
        assert!(info.type_name.ends_with("preset"));

        let preset = registry
            .create_provider("team-notes", &ConfigMap::new())
            .unwrap();
        assert_eq!(preset.name(), "team-notes");
        assert!(!preset.supports(vfsd_types::Capabilities::WRITE));

        let mut user = ConfigMap::new();
        user.insert("name".into(), MetaValue::from("mine"));
        let overridden = registry.create_provider("team-notes", &user).unwrap();
        assert_eq!(overridden.name(), "mine");
    }

    #[test]
    fn test_bad_manifests_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        write_manifest(root.path(), "a-broken", "this is = = not toml");
        write_manifest(root.path(), "b-orphan", "extends = \"does-not-exist\"\n");
        write_manifest(root.path(), "c-good", "name = \"good\"\n");
        std::fs::create_dir_all(root.path().join("d-no-manifest")).unwrap();

        let missing = root.path().join("missing");
        let mut registry = base_registry();
        let report =
            registry.discover_local_providers(Some(&[missing, root.path().to_path_buf()]));
        assert_eq!(report.found, ["good"]);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[1].error.contains("does-not-exist"));
        assert!(registry.contains("good"));
        assert!(!registry.contains("b-orphan"));
    }

    #[test]
    fn test_report_merge_dedups() {
        let mut a = DiscoveryReport {
            found: vec!["x".into(), "y".into()],
            failures: vec![],
        };
        a.merge(DiscoveryReport {
            found: vec!["y".into(), "z".into()],
            failures: vec![DiscoveryFailure {
                candidate: "q".into(),
                error: "boom".into(),
            }],
        });
        assert_eq!(a.found, ["x", "y", "z"]);
        assert!(!a.is_clean());
    }
}
