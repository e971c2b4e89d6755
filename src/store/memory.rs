//! In-process configuration store

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{normalize_label, ConfigSetting, ConfigStore, KeySelector};

type SettingKey = (String, Option<String>);

/// Mutable labeled settings held in memory
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    settings: RwLock<BTreeMap<SettingKey, ConfigSetting>>,
    list_calls: AtomicUsize,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings<I>(settings: I) -> Self
    where
        I: IntoIterator<Item = ConfigSetting>,
    {
        let store = Self::new();
        for setting in settings {
            store.insert(setting);
        }
        store
    }

    /// Create or replace a setting
    pub fn set(&self, key: &str, label: Option<&str>, value: &str) -> ConfigSetting {
        let setting = ConfigSetting::new(key, label, value);
        self.insert(setting.clone());
        setting
    }

    pub fn insert(&self, setting: ConfigSetting) {
        let id = (setting.key.clone(), setting.label.clone());
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, setting);
    }

    pub fn remove(&self, key: &str, label: Option<&str>) -> Option<ConfigSetting> {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(key.to_string(), normalize_label(label)))
    }

    pub fn get(&self, key: &str, label: Option<&str>) -> Option<ConfigSetting> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(key.to_string(), normalize_label(label)))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.settings.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of list requests served so far
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn list_settings(
        &self,
        selector: &KeySelector,
        cancel: &CancellationToken,
    ) -> Result<Vec<ConfigSetting>> {
        if cancel.is_cancelled() {
            bail!("listing settings cancelled");
        }

        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
        Ok(settings
            .values()
            .filter(|s| selector.matches(s))
            .cloned()
            .collect())
    }
}
