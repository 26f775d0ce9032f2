//! Daemon and provider configuration records.
//!
//! Configuration is TOML text. Where it lives on disk, and when it is loaded
//! or saved, is up to the host; this module only parses, renders and queries
//! it.
//!
//! ```toml
//! [daemon]
//! mount_path = "/tmp/vfsd"
//! cache_ttl_secs = 300
//!
//! [providers.scratch]
//! module = "memory"
//! auto_mount = true
//!
//! [providers.scratch.config]
//! name = "scratch"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vfsd_types::{MetaValue, Metadata};

/// Free-form provider configuration.
pub type ConfigMap = Metadata;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot render config: {0}")]
    Render(#[from] toml::ser::Error),
}

fn default_true() -> bool {
    true
}

/// A provider the daemon should know about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name. Filled from the table key when omitted.
    #[serde(default)]
    pub name: String,

    /// Registry name of the implementation to instantiate.
    pub module: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Mount when the daemon starts.
    #[serde(default)]
    pub auto_mount: bool,

    /// Mount segment override (defaults to `/name`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,

    /// Cache TTL override in seconds; `0` disables caching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,

    /// Provider-specific settings.
    #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
    pub config: ConfigMap,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            enabled: true,
            auto_mount: false,
            mount_point: None,
            cache_ttl_secs: None,
            config: ConfigMap::new(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn auto_mount(mut self, auto_mount: bool) -> Self {
        self.auto_mount = auto_mount;
        self
    }

    pub fn with_mount_point(mut self, mount_point: impl Into<String>) -> Self {
        self.mount_point = Some(mount_point.into());
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = Some(ttl.as_secs());
        self
    }

    /// Set one provider-specific key.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// This provider's TTL, falling back to the daemon default.
    pub fn effective_ttl(&self, daemon: &DaemonConfig) -> Duration {
        Duration::from_secs(self.cache_ttl_secs.unwrap_or(daemon.cache_ttl_secs))
    }
}

/// Settings for the daemon itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Where an external mount adapter should attach the namespace.
    pub mount_path: PathBuf,
    /// Default cache TTL in seconds; `0` disables caching.
    pub cache_ttl_secs: u64,
    /// Upper bound on cached entries per provider.
    pub max_cache_entries: usize,
    /// Default `tracing` filter directive for hosts (overridden by `RUST_LOG`).
    pub log_filter: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            mount_path: PathBuf::from("/tmp/vfsd"),
            cache_ttl_secs: 300,
            max_cache_entries: 1000,
            log_filter: "info".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Complete configuration: daemon settings plus known providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VfsdConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl VfsdConfig {
    /// Parse TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: VfsdConfig = toml::from_str(text)?;
        for (key, provider) in config.providers.iter_mut() {
            if provider.name.is_empty() {
                provider.name = key.clone();
            }
        }
        Ok(config)
    }

    /// Render as TOML text.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// Add or replace a provider entry, keyed by its name.
    pub fn register_provider(&mut self, provider: ProviderConfig) -> &ProviderConfig {
        let name = provider.name.clone();
        self.providers.insert(name.clone(), provider);
        &self.providers[&name]
    }

    /// Remove a provider entry. Returns false if it was not there.
    pub fn unregister_provider(&mut self, name: &str) -> bool {
        self.providers.remove(name).is_some()
    }

    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    pub fn list_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.values()
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.values().filter(|p| p.enabled)
    }

    /// Enabled providers marked for auto-mount.
    pub fn auto_mount_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.enabled_providers().filter(|p| p.auto_mount)
    }
}

/// `$XDG_CONFIG_HOME/vfsd` (or the platform equivalent).
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vfsd"))
}

/// Default search directory for local provider manifests.
pub fn providers_dir() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("providers"))
}

/// A provider package that is known to exist, for install hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownProvider {
    pub name: &'static str,
    pub package: &'static str,
    pub description: &'static str,
    pub required_config: &'static [&'static str],
    pub optional_config: &'static [&'static str],
}

macro_rules! known {
    ($name:literal, $desc:literal, [$($req:literal),*]) => {
        known!($name, $desc, [$($req),*], [])
    };
    ($name:literal, $desc:literal, [$($req:literal),*], [$($opt:literal),*]) => {
        KnownProvider {
            name: $name,
            package: concat!("vfs-", $name),
            description: $desc,
            required_config: &[$($req),*],
            optional_config: &[$($opt),*],
        }
    };
}

/// Provider packages published alongside the daemon.
pub const KNOWN_PROVIDERS: &[KnownProvider] = &[
    known!("slack", "Slack workspaces, channels, messages, threads", ["token"]),
    known!("github", "GitHub repos, branches, issues, PRs, files", ["token"]),
    known!("linear", "Linear issues, projects, cycles, roadmaps", ["api_key"]),
    known!("notion", "Notion pages, databases, blocks", ["token"]),
    known!("jira", "Jira projects, issues, sprints, boards", ["url", "email", "api_token"]),
    known!("gdrive", "Google Drive files, folders, shared drives", ["credentials_path"]),
    known!("dropbox", "Dropbox files, folders, Paper docs", ["access_token"]),
    known!("s3", "AWS S3 buckets and objects", [], ["region", "profile"]),
    known!("docker", "Docker containers, images, volumes, networks", [], ["socket_path"]),
    known!("k8s", "Kubernetes pods, deployments, services, configmaps", [], ["kubeconfig", "context"]),
    known!("postgres", "PostgreSQL databases, schemas, tables, rows", ["connection_string"]),
    known!("mongodb", "MongoDB databases, collections, documents", ["connection_string"]),
    known!("redis", "Redis keys, hashes, lists, sets, streams", [], ["host", "port", "password", "db"]),
    known!("elasticsearch", "Elasticsearch indices, documents, mappings", ["hosts"], ["api_key", "username", "password"]),
    known!("grafana", "Grafana dashboards, panels, datasources, alerts", ["url", "api_key"]),
    known!("prometheus", "Prometheus targets, metrics, rules, alerts", ["url"]),
    known!("gitlab", "GitLab projects, MRs, issues, pipelines, wiki", ["token"], ["url"]),
    known!("discord", "Discord servers, channels, messages, threads", ["token"]),
    known!("trello", "Trello boards, lists, cards, checklists", ["api_key", "token"]),
    known!("figma", "Figma files, frames, components, styles", ["access_token"]),
];

/// Look up a known provider package by provider name.
pub fn known_provider(name: &str) -> Option<&'static KnownProvider> {
    KNOWN_PROVIDERS.iter().find(|k| k.name == name)
}
