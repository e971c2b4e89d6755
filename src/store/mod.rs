//! Configuration stores
//!
//! A [`ConfigStore`] lists labeled settings. [`StoreConnector`] turns any
//! store into a [`crate::provider::ConfigConnector`] with live snapshots
//! and throttled refresh.
//!
//! Built-in stores:
//! - [`MemoryConfigStore`]: process-local, mutable at runtime
//! - [`FileConfigStore`]: App Configuration JSON export, addressed as `Endpoint=file:///path`

mod connection_string;
mod connector;
mod file;
mod memory;
mod token;

pub use connection_string::*;
pub use connector::*;
pub use file::*;
pub use memory::*;
pub use token::*;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

/// Label filter matching every label, including none
pub const ANY_LABEL: &str = "*";

/// A single labeled key/value setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSetting {
    pub key: String,

    /// `None` for the unlabeled partition
    #[serde(default)]
    pub label: Option<String>,

    pub value: String,

    /// Media type; JSON values are flattened into child keys (see [`ConfigSetting::flatten`])
    #[serde(default)]
    pub content_type: Option<String>,

    /// SHA-256 over key, label and value
    pub etag: String,
}

impl ConfigSetting {
    pub fn new(key: impl Into<String>, label: Option<&str>, value: impl Into<String>) -> Self {
        let key = key.into();
        let label = normalize_label(label);
        let value = value.into();
        let etag = compute_etag(&key, label.as_deref(), &value);
        Self {
            key,
            label,
            value,
            content_type: None,
            etag,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Whether the value is a JSON document to expand into child keys
    ///
    /// `application/json` and `application/*+json` qualify, except the
    /// App Configuration reference types (`application/vnd.microsoft.appconfig.*`).
    pub fn is_json(&self) -> bool {
        let Some(content_type) = self.content_type.as_deref() else {
            return false;
        };
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        media_type == "application/json"
            || (media_type.starts_with("application/")
                && media_type.ends_with("+json")
                && !media_type.starts_with("application/vnd.microsoft.appconfig."))
    }

    /// Snapshot entries for this setting, stored under `key`
    ///
    /// JSON values are flattened into `key:Child:0` paths; a JSON value that
    /// fails to parse is kept as a plain string.
    pub fn flatten(&self, key: &str) -> Vec<(String, String)> {
        if !self.is_json() {
            return vec![(key.to_string(), self.value.clone())];
        }

        match serde_json::from_str::<serde_json::Value>(&self.value) {
            Ok(document) => {
                let mut entries = Vec::new();
                flatten_json(key, &document, &mut entries);
                entries
            }
            Err(e) => {
                tracing::warn!(
                    key = %self.key,
                    error = %e,
                    "Setting has a JSON content type but is not valid JSON, using raw value"
                );
                vec![(key.to_string(), self.value.clone())]
            }
        }
    }
}

fn flatten_json(path: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            for (child, value) in map {
                flatten_json(&format!("{}:{}", path, child), value, out);
            }
        }
        Value::Array(items) => {
            for (i, value) in items.iter().enumerate() {
                flatten_json(&format!("{}:{}", path, i), value, out);
            }
        }
        Value::String(s) => out.push((path.to_string(), s.clone())),
        Value::Null => out.push((path.to_string(), String::new())),
        other => out.push((path.to_string(), other.to_string())),
    }
}

fn normalize_label(label: Option<&str>) -> Option<String> {
    label.filter(|l| !l.is_empty()).map(str::to_string)
}

fn compute_etag(key: &str, label: Option<&str>, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update([0u8]);
    hasher.update(label.unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Key and label filter for listing settings
///
/// A key filter ending in `*` is a prefix match, anything else is exact.
/// A `None` label matches only unlabeled settings; [`ANY_LABEL`] matches all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySelector {
    pub key_filter: String,
    pub label: Option<String>,
}

impl KeySelector {
    pub fn new(key_filter: impl Into<String>, label: Option<&str>) -> Self {
        Self {
            key_filter: key_filter.into(),
            label: normalize_label(label),
        }
    }

    pub fn matches(&self, setting: &ConfigSetting) -> bool {
        let key_matches = match self.key_filter.strip_suffix('*') {
            Some(prefix) => setting.key.starts_with(prefix),
            None => setting.key == self.key_filter,
        };

        let label_matches = match self.label.as_deref() {
            Some(ANY_LABEL) => true,
            Some(label) => setting.label.as_deref() == Some(label),
            None => setting.label.is_none(),
        };

        key_matches && label_matches
    }
}

/// Source of labeled settings
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// All settings matching `selector`
    async fn list_settings(
        &self,
        selector: &KeySelector,
        cancel: &CancellationToken,
    ) -> Result<Vec<ConfigSetting>>;
}

/// Open the store a connection string's endpoint points at
pub fn open_store(connection: &ConnectionString) -> Result<Arc<dyn ConfigStore>> {
    match connection.endpoint.scheme() {
        "file" => Ok(Arc::new(FileConfigStore::from_endpoint(&connection.endpoint)?)),
        other => bail!(
            "no configuration store client for endpoint scheme `{}`; connect with StoreConnector::new instead",
            other
        ),
    }
}
