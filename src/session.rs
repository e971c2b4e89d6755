//! Agent lifecycle bound to remote configuration
//!
//! [`AgentConfigSession::create_agent`] connects to the configuration
//! source, binds the selected settings into an [`AgentDefinition`] and asks
//! the factory for an agent. [`AgentConfigSession::refresh_agent`] later
//! synchronizes with the source and rebuilds the agent only when the
//! configuration changed.
//!
//! One session tracks one agent's configuration. Both operations lock the
//! session for their whole duration, so calls on the same session run one
//! at a time.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::binder;
use crate::definition::AgentDefinition;
use crate::error::{AppConfigError, MissingState, Result};
use crate::factory::{AgentCreationOptions, AgentFactory};
use crate::provider::{ChangeToken, ConfigConnector, ConfigRefresher, ConfigSnapshot, RefreshOptions};

struct ReadyState {
    refresher: Arc<dyn ConfigRefresher>,
    snapshot: Arc<dyn ConfigSnapshot>,
    change_token: Arc<dyn ChangeToken>,
}

enum SessionState {
    /// No bootstrap has completed
    Uninitialized,

    /// Bootstrap completed but a collaborator withheld one piece of state
    Incomplete(MissingState),

    Ready(ReadyState),
}

impl SessionState {
    fn assemble(
        refresher: Option<Arc<dyn ConfigRefresher>>,
        snapshot: Option<Arc<dyn ConfigSnapshot>>,
        change_token: Option<Arc<dyn ChangeToken>>,
    ) -> Self {
        match (refresher, snapshot, change_token) {
            (Some(refresher), Some(snapshot), Some(change_token)) => SessionState::Ready(ReadyState {
                refresher,
                snapshot,
                change_token,
            }),
            (None, _, _) => SessionState::Incomplete(MissingState::Refresher),
            (_, None, _) => SessionState::Incomplete(MissingState::Configuration),
            (_, _, None) => SessionState::Incomplete(MissingState::ChangeToken),
        }
    }

    fn ready_mut(&mut self) -> Result<&mut ReadyState> {
        match self {
            SessionState::Uninitialized => Err(AppConfigError::NotInitialized(MissingState::Refresher)),
            SessionState::Incomplete(missing) => Err(AppConfigError::NotInitialized(*missing)),
            SessionState::Ready(ready) => Ok(ready),
        }
    }
}

/// Builds an agent from remote configuration and rebuilds it on change
pub struct AgentConfigSession<F: AgentFactory> {
    connector: Arc<dyn ConfigConnector>,
    factory: F,
    refresh_options: RefreshOptions,
    state: Mutex<SessionState>,
}

impl<F: AgentFactory> AgentConfigSession<F> {
    pub fn new(connector: Arc<dyn ConfigConnector>, factory: F) -> Self {
        Self {
            connector,
            factory,
            refresh_options: RefreshOptions::register_all(),
            state: Mutex::new(SessionState::Uninitialized),
        }
    }

    /// Change tracking registered on bootstrap (default: watch every selected setting)
    pub fn with_refresh_options(mut self, options: RefreshOptions) -> Self {
        self.refresh_options = options;
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Whether a refresh can run
    pub async fn is_ready(&self) -> bool {
        matches!(*self.state.lock().await, SessionState::Ready(_))
    }

    /// Connect, select `key`/`label`, bind the snapshot and create the agent
    ///
    /// Replaces any state from an earlier call. The new state is committed
    /// once the snapshot is loaded and bound, before the factory runs; a
    /// failure or cancellation before that point leaves the previous state
    /// in place.
    pub async fn create_agent(
        &self,
        connection_string: &str,
        key: &str,
        label: Option<&str>,
        options: Option<&AgentCreationOptions<F::Runtime>>,
        cancel: &CancellationToken,
    ) -> Result<Option<F::Agent>> {
        let mut state = self.lock_state(cancel).await?;

        tracing::info!(
            key = %key,
            label = label.unwrap_or("<none>"),
            "Creating agent from app configuration"
        );

        let mut connection =
            until_cancelled(cancel, self.connector.connect(connection_string, cancel)).await?;

        connection.select(key, label);
        connection.configure_refresh(self.refresh_options.clone());
        let refresher = connection.refresher();

        let snapshot = until_cancelled(cancel, connection.build(cancel)).await?;
        let definition: AgentDefinition = binder::bind(&snapshot.entries())?;
        let change_token = snapshot.reload_token();

        *state = SessionState::assemble(refresher, Some(snapshot), change_token);
        if let SessionState::Incomplete(missing) = &*state {
            tracing::warn!(missing = %missing, "Configuration source cannot be refreshed");
        }

        tracing::debug!(
            name = definition.name.as_deref().unwrap_or("<none>"),
            "Bound agent definition"
        );

        self.create_from(definition, options, cancel).await
    }

    /// Synchronize with the configuration source and rebuild the agent if it changed
    ///
    /// Returns `Ok(None)` when nothing changed.
    ///
    /// The replacement change token is taken from the snapshot before binding,
    /// but it replaces the current token only after binding and the factory
    /// both succeed. Until then the current token keeps reporting a change, so
    /// a bind error, factory error or cancellation is retried by the next
    /// refresh instead of being skipped.
    pub async fn refresh_agent(
        &self,
        options: Option<&AgentCreationOptions<F::Runtime>>,
        cancel: &CancellationToken,
    ) -> Result<Option<F::Agent>> {
        let mut state = self.lock_state(cancel).await?;
        let ready = state.ready_mut()?;

        until_cancelled(cancel, ready.refresher.try_refresh(cancel)).await?;

        if !ready.change_token.has_changed() {
            tracing::debug!("No configuration change detected");
            return Ok(None);
        }

        // Issued before binding so changes landing during the rebuild are not lost
        let next_token = ready
            .snapshot
            .reload_token()
            .ok_or(AppConfigError::NotInitialized(MissingState::ChangeToken))?;

        let definition: AgentDefinition = binder::bind(&ready.snapshot.entries())?;
        let agent = self.create_from(definition, options, cancel).await?;
        ready.change_token = next_token;

        tracing::info!(created = agent.is_some(), "Agent rebuilt from updated configuration");

        Ok(agent)
    }

    async fn lock_state(&self, cancel: &CancellationToken) -> Result<MutexGuard<'_, SessionState>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppConfigError::Cancelled),
            guard = self.state.lock() => Ok(guard),
        }
    }

    async fn create_from(
        &self,
        definition: AgentDefinition,
        options: Option<&AgentCreationOptions<F::Runtime>>,
        cancel: &CancellationToken,
    ) -> Result<Option<F::Agent>> {
        let runtime = options
            .and_then(|o| o.runtime.clone())
            .unwrap_or_default();

        until_cancelled(cancel, self.factory.create(runtime, definition, options, cancel)).await
    }
}

/// Run `fut` unless `cancel` fires first
async fn until_cancelled<T, Fut>(cancel: &CancellationToken, fut: Fut) -> Result<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppConfigError::Cancelled),
        result = fut => result.map_err(AppConfigError::Upstream),
    }
}
