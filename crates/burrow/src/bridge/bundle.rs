//! Installed bundles and the module cache.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A command declared by a bundle manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleCommand {
    /// Name the shell invokes it by
    pub name: String,
    /// Module path inside the bundle
    #[serde(alias = "modulePath")]
    pub module_path: String,
}

/// A bundle that has been installed into the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledBundle {
    /// Bundle name
    pub name: String,
    /// Bundle version
    pub version: String,
    /// Content root the module paths are relative to
    pub root: String,
    /// Declared commands
    #[serde(default)]
    pub commands: Vec<BundleCommand>,
}

impl InstalledBundle {
    /// The declared command called `name`.
    pub fn command(&self, name: &str) -> Option<&BundleCommand> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Cache key for a command's module, `<root>/<module_path>`.
    pub fn module_key(&self, command: &BundleCommand) -> String {
        format!(
            "{}/{}",
            self.root.trim_end_matches('/'),
            command.module_path.trim_start_matches('/')
        )
    }
}

/// Bundles in installation order.
#[derive(Debug, Clone, Default)]
pub struct BundleRegistry {
    bundles: Vec<InstalledBundle>,
}

impl BundleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bundle. Earlier bundles win name clashes.
    pub fn install(&mut self, bundle: InstalledBundle) {
        self.bundles.push(bundle);
    }

    /// Installed bundles in order.
    pub fn bundles(&self) -> &[InstalledBundle] {
        &self.bundles
    }

    /// First bundle declaring `name`, with the matching command.
    pub fn resolve(&self, name: &str) -> Option<(&InstalledBundle, &BundleCommand)> {
        self.bundles
            .iter()
            .find_map(|bundle| bundle.command(name).map(|command| (bundle, command)))
    }
}

impl FromIterator<InstalledBundle> for BundleRegistry {
    fn from_iter<I: IntoIterator<Item = InstalledBundle>>(iter: I) -> Self {
        Self {
            bundles: iter.into_iter().collect(),
        }
    }
}

/// Content-addressed store of module bytes.
#[async_trait]
pub trait ModuleCache: Send + Sync {
    /// Module bytes for `key`, `None` on a miss.
    async fn get(&self, key: &str) -> Option<Arc<[u8]>>;
}

/// Module cache held in memory.
#[derive(Debug, Default)]
pub struct InMemoryModuleCache {
    modules: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl InMemoryModuleCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store module bytes under `key`.
    pub async fn insert(&self, key: impl Into<String>, module: impl Into<Arc<[u8]>>) {
        self.modules.write().await.insert(key.into(), module.into());
    }
}

#[async_trait]
impl ModuleCache for InMemoryModuleCache {
    async fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        self.modules.read().await.get(key).cloned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn bundle(name: &str, commands: &[&str]) -> InstalledBundle {
        InstalledBundle {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            root: format!("bundles/{name}/"),
            commands: commands
                .iter()
                .map(|c| BundleCommand {
                    name: c.to_string(),
                    module_path: format!("bin/{c}.wasm"),
                })
                .collect(),
        }
    }

    #[test]
    fn test_first_bundle_wins() {
        let registry: BundleRegistry =
            [bundle("core", &["ls", "cat"]), bundle("extra", &["cat", "jq"])]
                .into_iter()
                .collect();
        let (owner, command) = registry.resolve("cat").unwrap();
        assert_eq!(owner.name, "core");
        assert_eq!(owner.module_key(command), "bundles/core/bin/cat.wasm");
        assert_eq!(registry.resolve("jq").unwrap().0.name, "extra");
        assert!(registry.resolve("nope").is_none());
    }

    #[test]
    fn test_manifest_accepts_camel_case() {
        let bundle: InstalledBundle = serde_json::from_str(
            r#"{"name": "b", "version": "0.1", "root": "r",
                "commands": [{"name": "x", "modulePath": "x.wasm"}]}"#,
        )
        .unwrap();
        assert_eq!(bundle.commands[0].module_path, "x.wasm");
    }

    #[tokio::test]
    async fn test_cache_hit_and_miss() {
        let cache = InMemoryModuleCache::new();
        cache.insert("r/x.wasm", b"\0asm".to_vec()).await;
        assert_eq!(cache.get("r/x.wasm").await.unwrap().as_ref(), b"\0asm");
        assert!(cache.get("r/y.wasm").await.is_none());
    }
}
