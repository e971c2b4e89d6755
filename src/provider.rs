//! Configuration provider boundary
//!
//! A session talks to a remote configuration source only through these
//! traits. [`crate::store::StoreConnector`] implements them over any
//! [`crate::store::ConfigStore`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Default minimum time between two refreshes that actually reach the store
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Which settings are watched for changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchScope {
    /// Every selected setting; any change reloads the snapshot
    All,

    /// A single sentinel setting; when it changes every selected setting is reloaded
    Sentinel { key: String, label: Option<String> },
}

/// Change tracking options registered on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOptions {
    pub watch: WatchScope,

    /// Refresh attempts inside this window are skipped. Zero disables throttling.
    pub refresh_interval: Duration,
}

impl RefreshOptions {
    /// Watch everything that was selected
    pub fn register_all() -> Self {
        Self {
            watch: WatchScope::All,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    /// Reload everything when the given sentinel setting changes
    pub fn sentinel(key: impl Into<String>, label: Option<&str>) -> Self {
        Self {
            watch: WatchScope::Sentinel {
                key: key.into(),
                label: label.map(str::to_string),
            },
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self::register_all()
    }
}

/// Opens sessions to a configuration source
#[async_trait]
pub trait ConfigConnector: Send + Sync {
    async fn connect(
        &self,
        connection_string: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ConfigConnection>>;
}

/// An open connection being configured before the snapshot is built
#[async_trait]
pub trait ConfigConnection: Send {
    /// Add the settings matching `key_filter` and `label` to the snapshot.
    /// `None` selects unlabeled settings.
    fn select(&mut self, key_filter: &str, label: Option<&str>);

    fn configure_refresh(&mut self, options: RefreshOptions);

    /// Handle used later to synchronize the snapshot with the source.
    /// `None` when refresh was never configured.
    fn refresher(&self) -> Option<Arc<dyn ConfigRefresher>>;

    /// Load the selected settings into a live snapshot
    async fn build(&mut self, cancel: &CancellationToken) -> Result<Arc<dyn ConfigSnapshot>>;
}

/// Pulls remote changes into a snapshot
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigRefresher: Send + Sync {
    /// Returns `false` when the attempt was skipped by throttling
    async fn try_refresh(&self, cancel: &CancellationToken) -> Result<bool>;
}

/// Live key/value view of the selected configuration
pub trait ConfigSnapshot: Send + Sync {
    /// Current flat entries (`Section:Key` paths)
    fn entries(&self) -> BTreeMap<String, String>;

    /// A token that reports whether the snapshot changed after this call
    fn reload_token(&self) -> Option<Arc<dyn ChangeToken>>;

    fn get(&self, key: &str) -> Option<String> {
        self.entries().remove(key)
    }
}

/// One-shot change signal
#[cfg_attr(test, mockall::automock)]
pub trait ChangeToken: Send + Sync {
    fn has_changed(&self) -> bool;
}
