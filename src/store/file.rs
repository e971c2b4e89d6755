//! File-backed configuration store
//!
//! Reads an App Configuration JSON export:
//!
//! ```json
//! { "items": [ { "key": "Name", "label": null, "value": "demo-agent" } ] }
//! ```
//!
//! The file is re-read on every list, so edits show up on the next refresh.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{ConfigSetting, ConfigStore, KeySelector};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ExportDocument {
    #[serde(default)]
    items: Vec<ExportItem>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExportItem {
    key: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
}

impl From<ExportItem> for ConfigSetting {
    fn from(item: ExportItem) -> Self {
        let setting = ConfigSetting::new(item.key, item.label.as_deref(), item.value);
        match item.content_type {
            Some(content_type) => setting.with_content_type(content_type),
            None => setting,
        }
    }
}

/// Settings read from a JSON export on disk
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for a `file://` endpoint
    pub fn from_endpoint(endpoint: &Url) -> Result<Self> {
        if endpoint.scheme() != "file" {
            bail!("not a file endpoint: {}", endpoint);
        }
        let path = endpoint
            .to_file_path()
            .map_err(|_| anyhow!("file endpoint has no usable path: {}", endpoint))?;
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<ExportDocument> {
        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read configuration export {}", self.path.display()))?;

        serde_json::from_str(&content).context("Failed to parse configuration export")
    }

    /// Replace the export with `settings`
    ///
    /// Written to a temporary file and renamed so readers never see a partial document.
    pub async fn save(&self, settings: &[ConfigSetting]) -> Result<()> {
        let document = ExportDocument {
            items: settings
                .iter()
                .map(|s| ExportItem {
                    key: s.key.clone(),
                    label: s.label.clone(),
                    value: s.value.clone(),
                    content_type: s.content_type.clone(),
                })
                .collect(),
        };

        let json = serde_json::to_vec_pretty(&document)
            .context("Failed to serialize configuration export")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create configuration directory")?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)
            .await
            .context("Failed to create configuration export")?;
        file.write_all(&json)
            .await
            .context("Failed to write configuration export")?;
        file.flush().await?;
        drop(file);

        fs::rename(&tmp_path, &self.path)
            .await
            .context("Failed to replace configuration export")?;

        Ok(())
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn list_settings(
        &self,
        selector: &KeySelector,
        cancel: &CancellationToken,
    ) -> Result<Vec<ConfigSetting>> {
        let document = tokio::select! {
            _ = cancel.cancelled() => bail!("reading configuration export cancelled"),
            document = self.read_document() => document?,
        };

        let settings: Vec<ConfigSetting> = document
            .items
            .into_iter()
            .map(ConfigSetting::from)
            .filter(|s| selector.matches(s))
            .collect();

        tracing::debug!(
            path = %self.path.display(),
            key_filter = %selector.key_filter,
            count = settings.len(),
            "Listed settings from configuration export"
        );

        Ok(settings)
    }
}
