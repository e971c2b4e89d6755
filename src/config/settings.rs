//! Agent settings and configuration

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::provider::RefreshOptions;

/// Prefix of environment variables that override file settings
pub const ENV_PREFIX: &str = "ALGA_APPCONFIG";

/// Settings for bootstrapping an agent from app configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Connection string for the configuration store
    #[serde(default, skip_serializing)]
    pub connection_string: String,

    /// Key filter selecting the agent's settings
    #[serde(default)]
    pub key: String,

    /// Label of the settings; unlabeled when absent
    #[serde(default)]
    pub label: Option<String>,

    /// Minimum seconds between refreshes that reach the store
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,

    /// Seconds between refresh attempts
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Key prefixes stripped before binding
    #[serde(default)]
    pub trim_key_prefixes: Vec<String>,

    /// Log at debug level (the `--debug` flag also enables it)
    #[serde(default)]
    pub debug: bool,
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            key: String::new(),
            label: None,
            refresh_interval_seconds: default_refresh_interval(),
            poll_interval_seconds: default_poll_interval(),
            trim_key_prefixes: Vec::new(),
            debug: false,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("connection_string", &"<redacted>")
            .field("key", &self.key)
            .field("label", &self.label)
            .field("refresh_interval_seconds", &self.refresh_interval_seconds)
            .field("poll_interval_seconds", &self.poll_interval_seconds)
            .field("trim_key_prefixes", &self.trim_key_prefixes)
            .field("debug", &self.debug)
            .finish()
    }
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "algapsa", "agent")
            .map(|d| d.config_dir().join("appconfig.toml"))
            .unwrap_or_else(|| PathBuf::from("appconfig.toml"))
    }

    /// Load settings from `path` (if it exists) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                tracing::debug!(
                    path = %path.display(),
                    "Settings file not found, using defaults and environment"
                );
            }
            builder = builder.add_source(::config::File::from(path).required(false));
        }

        let settings: Settings = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .context("Failed to load settings")?
            .try_deserialize()
            .context("Failed to parse settings")?;

        Ok(settings)
    }

    /// Save settings as TOML (the connection string is never written)
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;

        tokio::fs::write(path, content)
            .await
            .context("Failed to write settings file")?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection_string.trim().is_empty() {
            bail!(
                "connection string is not configured (set {}_CONNECTION_STRING)",
                ENV_PREFIX
            );
        }
        if self.key.trim().is_empty() {
            bail!("configuration key is not configured (set {}_KEY)", ENV_PREFIX);
        }
        if self.poll_interval_seconds == 0 {
            bail!("poll_interval_seconds must be greater than zero");
        }
        Ok(())
    }

    /// Label to select, with empty treated as unlabeled
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref().filter(|l| !l.is_empty())
    }

    pub fn refresh_options(&self) -> RefreshOptions {
        RefreshOptions::register_all()
            .with_refresh_interval(Duration::from_secs(self.refresh_interval_seconds))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}
