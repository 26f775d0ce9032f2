//! Provider registry.
//!
//! Maps provider names to metadata and a factory. The daemon never
//! constructs providers itself; it asks a registry, which validates the
//! supplied configuration first.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ConfigMap;
use crate::provider::Provider;

/// Builds a provider from its configuration.
pub type ProviderFactory =
    Arc<dyn Fn(&ConfigMap) -> anyhow::Result<Arc<dyn Provider>> + Send + Sync>;

/// Providers constructible straight from a config map.
///
/// Implementing this lets [`ProviderRegistry::register`] supply the factory.
pub trait FromConfig: Provider + Sized + 'static {
    fn from_config(config: &ConfigMap) -> anyhow::Result<Self>;
}

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("provider not registered: {0}")]
    NotRegistered(String),

    #[error("missing required config for {provider}: {}", .missing.join(", "))]
    MissingConfig {
        provider: String,
        missing: Vec<String>,
    },

    #[error("failed to create provider {provider}: {error:#}")]
    Factory {
        provider: String,
        error: anyhow::Error,
    },

    #[error("invalid provider manifest {}: {message}", .path.display())]
    Manifest { path: PathBuf, message: String },
}

/// Metadata about a registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    /// Implementing type, for diagnostics.
    #[serde(default)]
    pub type_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_config: Vec<String>,
    #[serde(default)]
    pub optional_config: Vec<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

impl ProviderInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: String::new(),
            description: String::new(),
            required_config: Vec::new(),
            optional_config: Vec::new(),
            version: default_version(),
        }
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_required<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_config = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_optional<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_config = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Required keys absent from `config`, in declaration order.
    pub fn missing_config(&self, config: &ConfigMap) -> Vec<String> {
        self.required_config
            .iter()
            .filter(|key| !config.contains_key(key.as_str()))
            .cloned()
            .collect()
    }
}

#[derive(Clone)]
struct Registration {
    info: ProviderInfo,
    factory: ProviderFactory,
}

/// Name → (metadata, factory).
///
/// An explicit instance: create one per daemon (or per test).
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Registration>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.providers.keys().collect();
        names.sort();
        f.debug_struct("ProviderRegistry")
            .field("providers", &names)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `P`, built through [`FromConfig`].
    pub fn register<P: FromConfig>(&mut self, info: ProviderInfo) {
        let info = if info.type_name.is_empty() {
            info.with_type_name(std::any::type_name::<P>())
        } else {
            info
        };
        self.register_factory(info, |config: &ConfigMap| {
            let provider: Arc<dyn Provider> = Arc::new(P::from_config(config)?);
            Ok(provider)
        });
    }

    /// Register with an explicit factory. A later registration under the
    /// same name replaces the earlier one.
    pub fn register_factory<F>(&mut self, info: ProviderInfo, factory: F)
    where
        F: Fn(&ConfigMap) -> anyhow::Result<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        self.insert(Registration {
            info,
            factory: Arc::new(factory),
        });
    }

    fn insert(&mut self, registration: Registration) {
        let name = registration.info.name.clone();
        info!(
            name = %name,
            type_name = %registration.info.type_name,
            "Registering provider"
        );
        if self.providers.insert(name.clone(), registration).is_some() {
            debug!(name = %name, "Replaced existing provider registration");
        }
    }

    /// Remove a provider, returning its metadata if it was registered.
    pub fn unregister(&mut self, name: &str) -> Option<ProviderInfo> {
        let removed = self.providers.remove(name).map(|r| r.info);
        if removed.is_some() {
            info!(name = %name, "Unregistered provider");
        }
        removed
    }

    pub fn get_info(&self, name: &str) -> Option<&ProviderInfo> {
        self.providers.get(name).map(|r| &r.info)
    }

    /// All registered providers, sorted by name.
    pub fn list_providers(&self) -> Vec<&ProviderInfo> {
        let mut infos: Vec<_> = self.providers.values().map(|r| &r.info).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// The factory registered under `name`.
    pub fn factory(&self, name: &str) -> Option<ProviderFactory> {
        self.providers.get(name).map(|r| Arc::clone(&r.factory))
    }

    /// Validate `config` against the provider's required keys and build it.
    pub fn create_provider(
        &self,
        name: &str,
        config: &ConfigMap,
    ) -> Result<Arc<dyn Provider>, RegistryError> {
        let registration = self
            .providers
            .get(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;

        let missing = registration.info.missing_config(config);
        if !missing.is_empty() {
            return Err(RegistryError::MissingConfig {
                provider: name.to_string(),
                missing,
            });
        }

        (registration.factory)(config).map_err(|error| RegistryError::Factory {
            provider: name.to_string(),
            error,
        })
    }

    /// Move every registration from `other` into `self`. Returns the names
    /// merged, sorted.
    pub fn merge(&mut self, other: ProviderRegistry) -> Vec<String> {
        let mut names = Vec::with_capacity(other.providers.len());
        for (name, registration) in other.providers {
            names.push(name);
            self.insert(registration);
        }
        names.sort();
        names
    }
}
