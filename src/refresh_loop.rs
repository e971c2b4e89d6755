//! Periodic agent refresh
//!
//! Polls [`AgentConfigSession::refresh_agent`] on an interval and delivers
//! every rebuilt agent over a channel. Refresh failures are logged and the
//! loop keeps polling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::AppConfigError;
use crate::factory::{AgentCreationOptions, AgentFactory};
use crate::session::AgentConfigSession;

/// Default time between refresh attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Rebuilt agents buffered before the loop waits for the receiver
const CHANNEL_CAPACITY: usize = 8;

/// Refresh loop configuration
#[derive(Debug, Clone)]
pub struct RefreshLoopConfig<R> {
    /// Time between refresh attempts
    pub poll_interval: Duration,

    /// Options passed to every rebuild
    pub options: Option<AgentCreationOptions<R>>,
}

impl<R> RefreshLoopConfig<R> {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            options: None,
        }
    }

    pub fn with_options(mut self, options: AgentCreationOptions<R>) -> Self {
        self.options = Some(options);
        self
    }
}

impl<R> Default for RefreshLoopConfig<R> {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

/// Spawn the refresh loop for a bootstrapped session
///
/// The loop ends when `cancel` fires or the returned receiver is dropped.
pub fn spawn<F>(
    session: Arc<AgentConfigSession<F>>,
    config: RefreshLoopConfig<F::Runtime>,
    cancel: CancellationToken,
) -> (JoinHandle<()>, mpsc::Receiver<F::Agent>)
where
    F: AgentFactory + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = tokio::spawn(run(session, config, cancel, tx));
    (handle, rx)
}

async fn run<F>(
    session: Arc<AgentConfigSession<F>>,
    config: RefreshLoopConfig<F::Runtime>,
    cancel: CancellationToken,
    tx: mpsc::Sender<F::Agent>,
) where
    F: AgentFactory + 'static,
{
    let mut ticker = tokio::time::interval(config.poll_interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; the session was just bootstrapped
    ticker.tick().await;

    tracing::info!(
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Agent refresh loop started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match session.refresh_agent(config.options.as_ref(), &cancel).await {
            Ok(Some(agent)) => {
                if tx.send(agent).await.is_err() {
                    tracing::debug!("Agent receiver dropped");
                    break;
                }
            }
            Ok(None) => {}
            Err(AppConfigError::Cancelled) => break,
            Err(e) => {
                tracing::error!(error = %e, "Agent refresh failed");
            }
        }
    }

    tracing::info!("Agent refresh loop stopped");
}
