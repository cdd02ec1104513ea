//! The registry/configuration-store abstraction (spec §4.9). The core
//! only ever asks a `ConfigStore` for a flattened `/`-joined key tree;
//! which concrete backend serves that tree is out of scope for this
//! crate (spec.md §1 non-goals) and is consumed entirely through this
//! trait. `TomlConfigStore` is the one implementation shipped here,
//! useful for local runs and tests.

use async_trait::async_trait;
use device_svc_api::Error;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Returns every key under `prefix`, flattened to `/`-joined paths
    /// relative to the store's root (not relative to `prefix`).
    async fn get_tree(&self, prefix: &str) -> Result<HashMap<String, String>, Error>;

    /// Registers for change notification on `prefix`. The default
    /// no-op implementation suits stores that don't support watching;
    /// hot-reload of the `Writable/` subtree (spec §4.9) then simply
    /// never fires.
    async fn watch(&self, _prefix: &str) -> Result<(), Error> {
        Ok(())
    }
}

/// Reads a single TOML document from disk and treats every key path
/// through it as the full configuration tree, keyed the same way a
/// real registry would key it (`Device/MaxCmdOps`, and so on).
pub struct TomlConfigStore {
    tree: HashMap<String, String>,
}

impl TomlConfigStore {
    pub async fn load(path: &str) -> Result<Self, Error> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| Error::ConfParse(e.to_string()))?;
        let value: toml::Value = toml::from_str(&contents).map_err(|e| Error::ConfParse(e.to_string()))?;

        let mut tree = HashMap::new();
        flatten("", &value, &mut tree);
        Ok(TomlConfigStore { tree })
    }
}

#[async_trait]
impl ConfigStore for TomlConfigStore {
    async fn get_tree(&self, prefix: &str) -> Result<HashMap<String, String>, Error> {
        let prefix_with_slash = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .tree
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix_with_slash) || *k == prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

fn flatten(path: &str, value: &toml::Value, out: &mut HashMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                let child_path = if path.is_empty() { key.clone() } else { format!("{}/{}", path, key) };
                flatten(&child_path, child, out);
            }
        }
        toml::Value::String(s) => {
            out.insert(path.to_string(), s.clone());
        }
        toml::Value::Integer(i) => {
            out.insert(path.to_string(), i.to_string());
        }
        toml::Value::Float(f) => {
            out.insert(path.to_string(), f.to_string());
        }
        toml::Value::Boolean(b) => {
            out.insert(path.to_string(), b.to_string());
        }
        toml::Value::Datetime(dt) => {
            out.insert(path.to_string(), dt.to_string());
        }
        toml::Value::Array(items) => {
            let joined = items
                .iter()
                .map(|item| match item {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            out.insert(path.to_string(), joined);
        }
    }
}

/// `Device/AllowedFails` style keys become `DEVICE_ALLOWEDFAILS`
/// environment variables (spec §4.9 "env override rule"); a present
/// variable always wins over the store's own value.
pub fn apply_env_overrides(tree: &mut HashMap<String, String>) {
    let keys: Vec<String> = tree.keys().cloned().collect();
    for key in keys {
        let var_name = key.replace('/', "_").to_uppercase();
        if let Ok(value) = std::env::var(&var_name) {
            tree.insert(key, value);
        }
    }
}

/// Strips the leading `Writable/` component, used to hand the hot-
/// reloadable subset of the tree to whatever holds the live log-level
/// and telemetry-interval settings.
pub fn writable_subset(tree: &HashMap<String, String>) -> HashMap<String, String> {
    tree.iter()
        .filter_map(|(k, v)| k.strip_prefix("Writable/").map(|stripped| (stripped.to_string(), v.clone())))
        .collect()
}

/// Polls `store` for `<service_name>` and `core-common-config-bootstrapper`
/// trees until both are present (the `IsCommonConfigReady` gate, spec
/// §4.9), merging common-then-private and applying environment
/// overrides last. Gives up once `deadline` elapses.
pub async fn bootstrap(
    store: &dyn ConfigStore,
    service_name: &str,
    deadline: Duration,
    interval: Duration,
) -> Result<HashMap<String, String>, Error> {
    let start = Instant::now();

    loop {
        let common = store.get_tree("core-common-config-bootstrapper").await.unwrap_or_default();
        let private = store.get_tree(service_name).await.unwrap_or_default();

        if !common.is_empty() || !private.is_empty() {
            let mut merged = common;
            merged.extend(private);
            apply_env_overrides(&mut merged);
            info!(service_name, keys = merged.len(), "configuration bootstrap complete");
            return Ok(merged);
        }

        if start.elapsed() >= deadline {
            return Err(Error::RemoteServerDown(format!("configuration not ready for {} after {:?}", service_name, deadline)));
        }

        warn!(service_name, "configuration not yet ready, retrying");
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_nested_table() {
        let doc: toml::Value = toml::from_str("[Device]\nMaxCmdOps = 64\n[Device.Discovery]\nEnabled = true\n").unwrap();
        let mut out = HashMap::new();
        flatten("", &doc, &mut out);
        assert_eq!(out.get("Device/MaxCmdOps"), Some(&"64".to_string()));
        assert_eq!(out.get("Device/Discovery/Enabled"), Some(&"true".to_string()));
    }

    #[test]
    fn test_writable_subset_strips_prefix() {
        let mut tree = HashMap::new();
        tree.insert("Writable/LogLevel".to_string(), "DEBUG".to_string());
        tree.insert("Device/MaxCmdOps".to_string(), "64".to_string());

        let subset = writable_subset(&tree);
        assert_eq!(subset.get("LogLevel"), Some(&"DEBUG".to_string()));
        assert!(!subset.contains_key("Device/MaxCmdOps"));
    }

    #[test]
    fn test_env_override_wins() {
        std::env::set_var("DEVICE_MAXCMDOPS", "999");
        let mut tree = HashMap::new();
        tree.insert("Device/MaxCmdOps".to_string(), "64".to_string());
        apply_env_overrides(&mut tree);
        assert_eq!(tree.get("Device/MaxCmdOps"), Some(&"999".to_string()));
        std::env::remove_var("DEVICE_MAXCMDOPS");
    }
}
