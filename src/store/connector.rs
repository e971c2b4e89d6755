//! Connections, live snapshots and refreshers over a [`ConfigStore`]

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{open_store, ConfigSetting, ConfigStore, ConnectionString, KeySelector, ReloadTrigger};
use crate::provider::{
    ChangeToken, ConfigConnection, ConfigConnector, ConfigRefresher, ConfigSnapshot,
    RefreshOptions, WatchScope,
};

/// Identity of a setting: key and label
type SettingId = (String, Option<String>);

enum StoreSource {
    Fixed(Arc<dyn ConfigStore>),
    Endpoint,
}

/// [`ConfigConnector`] backed by a [`ConfigStore`]
///
/// Either bound to one store, or resolving the store from the connection
/// string's endpoint with [`open_store`].
pub struct StoreConnector {
    source: StoreSource,
    trimmed_prefixes: Vec<String>,
}

impl StoreConnector {
    /// Every connection goes to `store`; the connection string is still validated
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            source: StoreSource::Fixed(store),
            trimmed_prefixes: Vec::new(),
        }
    }

    /// Resolve the store from each connection string's endpoint
    pub fn from_endpoint() -> Self {
        Self {
            source: StoreSource::Endpoint,
            trimmed_prefixes: Vec::new(),
        }
    }

    /// Strip `prefix` from keys before they enter the snapshot
    pub fn with_trimmed_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.trimmed_prefixes.push(prefix.into());
        self
    }
}

#[async_trait]
impl ConfigConnector for StoreConnector {
    async fn connect(
        &self,
        connection_string: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ConfigConnection>> {
        let connection = ConnectionString::parse(connection_string)?;

        if cancel.is_cancelled() {
            bail!("connect cancelled");
        }

        let store = match &self.source {
            StoreSource::Fixed(store) => store.clone(),
            StoreSource::Endpoint => open_store(&connection)?,
        };

        tracing::info!(
            endpoint = %connection.endpoint,
            id_prefix = %connection.id_prefix(),
            "Connected to configuration store"
        );

        Ok(Box::new(StoreConnection::new(store, self.trimmed_prefixes.clone())))
    }
}

/// State shared by a connection's snapshot and refresher
struct Shared {
    store: Arc<dyn ConfigStore>,
    trimmed_prefixes: Vec<String>,
    selectors: RwLock<Vec<KeySelector>>,
    entries: RwLock<BTreeMap<String, String>>,
    watched: RwLock<BTreeMap<SettingId, String>>,
    last_refresh: Mutex<Option<Instant>>,
    trigger: ReloadTrigger,
}

impl Shared {
    fn trim_key<'a>(&self, key: &'a str) -> &'a str {
        self.trimmed_prefixes
            .iter()
            .find_map(|prefix| key.strip_prefix(prefix.as_str()))
            .filter(|trimmed| !trimmed.is_empty())
            .unwrap_or(key)
    }

    /// Load every selected setting. Later selectors override earlier ones for the same key.
    async fn load(&self, cancel: &CancellationToken) -> Result<(BTreeMap<String, String>, Vec<ConfigSetting>)> {
        let selectors = self
            .selectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut entries = BTreeMap::new();
        let mut loaded = Vec::new();
        for selector in &selectors {
            if cancel.is_cancelled() {
                bail!("configuration load cancelled");
            }
            for setting in self.store.list_settings(selector, cancel).await? {
                entries.extend(setting.flatten(self.trim_key(&setting.key)));
                loaded.push(setting);
            }
        }

        Ok((entries, loaded))
    }

    /// Etags of the settings covered by `scope`
    async fn watched_etags(
        &self,
        scope: &WatchScope,
        loaded: Option<&[ConfigSetting]>,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<SettingId, String>> {
        let settings = match (scope, loaded) {
            (WatchScope::All, Some(loaded)) => loaded.to_vec(),
            (WatchScope::All, None) => self.load(cancel).await?.1,
            (WatchScope::Sentinel { key, label }, _) => {
                let selector = KeySelector::new(key.clone(), label.as_deref());
                self.store.list_settings(&selector, cancel).await?
            }
        };

        Ok(settings
            .into_iter()
            .map(|s| ((s.key, s.label), s.etag))
            .collect())
    }

    fn commit(&self, entries: BTreeMap<String, String>, watched: BTreeMap<SettingId, String>) {
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = entries;
        *self.watched.write().unwrap_or_else(PoisonError::into_inner) = watched;
    }
}

/// Connection being configured; [`ConfigConnection::build`] loads the snapshot
pub struct StoreConnection {
    shared: Arc<Shared>,
    selectors: Vec<KeySelector>,
    refresh: Option<RefreshOptions>,
}

impl StoreConnection {
    pub fn new(store: Arc<dyn ConfigStore>, trimmed_prefixes: Vec<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                trimmed_prefixes,
                selectors: RwLock::new(Vec::new()),
                entries: RwLock::new(BTreeMap::new()),
                watched: RwLock::new(BTreeMap::new()),
                last_refresh: Mutex::new(None),
                trigger: ReloadTrigger::new(),
            }),
            selectors: Vec::new(),
            refresh: None,
        }
    }
}

#[async_trait]
impl ConfigConnection for StoreConnection {
    fn select(&mut self, key_filter: &str, label: Option<&str>) {
        self.selectors.push(KeySelector::new(key_filter, label));
    }

    fn configure_refresh(&mut self, options: RefreshOptions) {
        self.refresh = Some(options);
    }

    fn refresher(&self) -> Option<Arc<dyn ConfigRefresher>> {
        self.refresh.clone().map(|options| {
            Arc::new(StoreRefresher {
                shared: self.shared.clone(),
                options,
            }) as Arc<dyn ConfigRefresher>
        })
    }

    async fn build(&mut self, cancel: &CancellationToken) -> Result<Arc<dyn ConfigSnapshot>> {
        let selectors = if self.selectors.is_empty() {
            vec![KeySelector::new("*", None)]
        } else {
            self.selectors.clone()
        };
        *self
            .shared
            .selectors
            .write()
            .unwrap_or_else(PoisonError::into_inner) = selectors;

        let (entries, loaded) = self.shared.load(cancel).await?;
        let watched = match &self.refresh {
            Some(options) => {
                self.shared
                    .watched_etags(&options.watch, Some(&loaded), cancel)
                    .await?
            }
            None => BTreeMap::new(),
        };

        tracing::info!(
            settings = loaded.len(),
            keys = entries.len(),
            "Loaded configuration snapshot"
        );

        self.shared.commit(entries, watched);
        *self.shared.last_refresh.lock().await = Some(Instant::now());

        Ok(Arc::new(StoreSnapshot {
            shared: self.shared.clone(),
        }))
    }
}

/// Live view of a connection's settings; entries are replaced in place on refresh
pub struct StoreSnapshot {
    shared: Arc<Shared>,
}

impl ConfigSnapshot for StoreSnapshot {
    fn entries(&self) -> BTreeMap<String, String> {
        self.shared
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn reload_token(&self) -> Option<Arc<dyn ChangeToken>> {
        Some(Arc::new(self.shared.trigger.token()))
    }
}

/// Throttled synchronization of a snapshot with its store
pub struct StoreRefresher {
    shared: Arc<Shared>,
    options: RefreshOptions,
}

#[async_trait]
impl ConfigRefresher for StoreRefresher {
    async fn try_refresh(&self, cancel: &CancellationToken) -> Result<bool> {
        // Held for the whole attempt so concurrent refreshes do not interleave
        let mut last_refresh = self.shared.last_refresh.lock().await;

        if let Some(at) = *last_refresh {
            if at.elapsed() < self.options.refresh_interval {
                tracing::debug!(
                    interval_ms = self.options.refresh_interval.as_millis() as u64,
                    "Refresh skipped, interval not elapsed"
                );
                return Ok(false);
            }
        }
        *last_refresh = Some(Instant::now());

        let (current, loaded) = match &self.options.watch {
            WatchScope::All => {
                let (entries, loaded) = self.shared.load(cancel).await?;
                let etags = self
                    .shared
                    .watched_etags(&WatchScope::All, Some(&loaded), cancel)
                    .await?;
                (etags, Some(entries))
            }
            sentinel => (self.shared.watched_etags(sentinel, None, cancel).await?, None),
        };

        let unchanged = *self.shared.watched.read().unwrap_or_else(PoisonError::into_inner) == current;
        if unchanged {
            tracing::debug!("Configuration unchanged");
            return Ok(true);
        }

        let entries = match loaded {
            Some(entries) => entries,
            None => self.shared.load(cancel).await?.0,
        };

        let keys = entries.len();
        self.shared.commit(entries, current);
        self.shared.trigger.fire();

        tracing::info!(
            keys,
            generation = self.shared.trigger.generation(),
            "Configuration refreshed"
        );

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryConfigStore;
    use std::time::Duration;

    const CONN: &str = "Endpoint=https://demo.azconfig.io;Id=test;Secret=c2VjcmV0";

    async fn connect(
        store: Arc<MemoryConfigStore>,
        options: RefreshOptions,
    ) -> (Arc<dyn ConfigSnapshot>, Arc<dyn ConfigRefresher>) {
        let connector = StoreConnector::new(store);
        let cancel = CancellationToken::new();
        let mut connection = connector.connect(CONN, &cancel).await.unwrap();
        connection.select("*", None);
        connection.configure_refresh(options);
        let refresher = connection.refresher().unwrap();
        let snapshot = connection.build(&cancel).await.unwrap();
        (snapshot, refresher)
    }

    #[tokio::test]
    async fn refresher_absent_until_configured() {
        let connector = StoreConnector::new(Arc::new(MemoryConfigStore::new()));
        let connection = connector.connect(CONN, &CancellationToken::new()).await.unwrap();
        assert!(connection.refresher().is_none());
    }

    #[tokio::test]
    async fn connect_validates_connection_string() {
        let connector = StoreConnector::new(Arc::new(MemoryConfigStore::new()));
        assert!(connector.connect("", &CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn refresh_detects_value_change_and_fires_token() {
        let store = Arc::new(MemoryConfigStore::new());
        store.set("Name", None, "v1");
        let (snapshot, refresher) =
            connect(store.clone(), RefreshOptions::register_all().with_refresh_interval(Duration::ZERO)).await;

        let token = snapshot.reload_token().unwrap();
        assert!(refresher.try_refresh(&CancellationToken::new()).await.unwrap());
        assert!(!token.has_changed());

        store.set("Name", None, "v2");
        assert!(refresher.try_refresh(&CancellationToken::new()).await.unwrap());
        assert!(token.has_changed());
        assert_eq!(snapshot.get("Name").as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn refresh_detects_removed_settings() {
        let store = Arc::new(MemoryConfigStore::new());
        store.set("Name", None, "v1");
        store.set("Instructions", None, "be brief");
        let (snapshot, refresher) =
            connect(store.clone(), RefreshOptions::register_all().with_refresh_interval(Duration::ZERO)).await;

        let token = snapshot.reload_token().unwrap();
        store.remove("Instructions", None);
        refresher.try_refresh(&CancellationToken::new()).await.unwrap();

        assert!(token.has_changed());
        assert!(snapshot.get("Instructions").is_none());
    }

    #[tokio::test]
    async fn refresh_is_throttled_by_interval() {
        let store = Arc::new(MemoryConfigStore::new());
        store.set("Name", None, "v1");
        let (snapshot, refresher) =
            connect(store.clone(), RefreshOptions::register_all().with_refresh_interval(Duration::from_secs(3600))).await;

        let calls = store.list_calls();
        store.set("Name", None, "v2");
        assert!(!refresher.try_refresh(&CancellationToken::new()).await.unwrap());
        assert_eq!(store.list_calls(), calls);
        assert_eq!(snapshot.get("Name").as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn sentinel_gates_reload() {
        let store = Arc::new(MemoryConfigStore::new());
        store.set("Name", None, "v1");
        store.set("Sentinel", None, "1");
        let (snapshot, refresher) = connect(
            store.clone(),
            RefreshOptions::sentinel("Sentinel", None).with_refresh_interval(Duration::ZERO),
        )
        .await;
        let token = snapshot.reload_token().unwrap();
        let cancel = CancellationToken::new();

        store.set("Name", None, "v2");
        refresher.try_refresh(&cancel).await.unwrap();
        assert!(!token.has_changed());
        assert_eq!(snapshot.get("Name").as_deref(), Some("v1"));

        store.set("Sentinel", None, "2");
        refresher.try_refresh(&cancel).await.unwrap();
        assert!(token.has_changed());
        assert_eq!(snapshot.get("Name").as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn later_selectors_override_and_prefixes_are_trimmed() {
        let store = Arc::new(MemoryConfigStore::new());
        store.set("agents:demo:Name", None, "base");
        store.set("agents:demo:Name", Some("prod"), "prod");
        store.set("agents:demo:Instructions", None, "be brief");

        let connector = StoreConnector::new(store).with_trimmed_prefix("agents:demo:");
        let cancel = CancellationToken::new();
        let mut connection = connector.connect(CONN, &cancel).await.unwrap();
        connection.select("agents:demo:*", None);
        connection.select("agents:demo:*", Some("prod"));
        let snapshot = connection.build(&cancel).await.unwrap();

        let entries = snapshot.entries();
        assert_eq!(entries.get("Name").map(String::as_str), Some("prod"));
        assert_eq!(entries.get("Instructions").map(String::as_str), Some("be brief"));
    }

    #[tokio::test]
    async fn build_without_select_loads_unlabeled_settings() {
        let store = Arc::new(MemoryConfigStore::new());
        store.set("Name", None, "unlabeled");
        store.set("Name", Some("prod"), "labeled");

        let connector = StoreConnector::new(store);
        let cancel = CancellationToken::new();
        let mut connection = connector.connect(CONN, &cancel).await.unwrap();
        let snapshot = connection.build(&cancel).await.unwrap();
        assert_eq!(snapshot.get("Name").as_deref(), Some("unlabeled"));
    }
}
